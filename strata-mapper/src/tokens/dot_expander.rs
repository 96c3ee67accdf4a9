// Copyright 2021-Present Datadog, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::{NameTracker, Token, TokenError, TokenLocation, TokenSource};
use crate::content_path::ContentPath;

/// Splits a field name on dots. A trailing empty segment is dropped unless the
/// name is only made of dots.
pub(crate) fn split_field_name(field_name: &str) -> Vec<String> {
    let mut segments: Vec<String> = field_name.split('.').map(str::to_string).collect();
    if segments.len() > 1 && segments.iter().all(String::is_empty) {
        return segments;
    }
    if segments.len() > 1 && segments.last().map_or(false, String::is_empty) {
        segments.pop();
    }
    segments
}

struct Level {
    is_object: bool,
    // Synthetic objects currently open in this object, outermost first.
    open_objects: Vec<String>,
}

impl Level {
    fn new(is_object: bool) -> Level {
        Level {
            is_object,
            open_objects: Vec::new(),
        }
    }
}

enum KeyPhase {
    /// Close the synthetic objects that are not a prefix of the key.
    Align,
    /// Emit the next segment as a field name.
    Name,
    /// Open a synthetic object for the segment that was just emitted.
    Open,
}

struct PendingKey {
    original: String,
    segments: Vec<String>,
    next_segment: usize,
    phase: KeyPhase,
    location: TokenLocation,
}

/// Token source rewriting dotted field names into objects.
///
/// `{"a.b": 1, "a.c": 2}` is read as `{"a": {"b": 1, "c": 2}}`: consecutive keys
/// sharing a prefix share the synthetic object. Synthetic objects stay open
/// until a key that does not start with their path, or the end of the
/// enclosing object, is read.
///
/// While the content path is flagged as being within a leaf object, keys are
/// not expanded any further and are emitted literally, minus the prefix of the
/// synthetic objects already open.
///
/// Synthetic tokens report the location of the key they were produced from.
pub struct DotExpandingTokenSource<S> {
    inner: S,
    content_path: ContentPath,
    levels: Vec<Level>,
    pending_key: Option<PendingKey>,
    // Inner token held back while synthetic objects are being closed.
    deferred: Option<(Token, TokenLocation)>,
    names: NameTracker,
    location: TokenLocation,
}

impl<S: TokenSource> DotExpandingTokenSource<S> {
    pub fn new(inner: S) -> DotExpandingTokenSource<S> {
        DotExpandingTokenSource {
            inner,
            content_path: ContentPath::new(),
            levels: Vec::new(),
            pending_key: None,
            deferred: None,
            names: NameTracker::default(),
            location: TokenLocation::default(),
        }
    }

    pub fn content_path(&self) -> &ContentPath {
        &self.content_path
    }

    pub fn content_path_mut(&mut self) -> &mut ContentPath {
        &mut self.content_path
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn advance_pending_key(&mut self) -> Option<(Token, TokenLocation)> {
        let DotExpandingTokenSource {
            pending_key,
            levels,
            content_path,
            ..
        } = self;
        let key = pending_key.as_mut()?;
        let location = key.location;
        let Some(level) = levels.last_mut().filter(|level| level.is_object) else {
            // A field name outside of an object: pass it through untouched.
            let key = pending_key.take()?;
            return Some((Token::FieldName(key.original), location));
        };
        let open_objects = &mut level.open_objects;
        match key.phase {
            KeyPhase::Open => {
                open_objects.push(key.segments[key.next_segment - 1].clone());
                key.phase = KeyPhase::Name;
                return Some((Token::StartObject, location));
            }
            KeyPhase::Align => {
                let shared_len = open_objects
                    .iter()
                    .zip(key.segments.iter())
                    .take_while(|(open_object, segment)| open_object == segment)
                    .count()
                    .min(key.segments.len() - 1);
                if open_objects.len() > shared_len {
                    open_objects.pop();
                    return Some((Token::EndObject, location));
                }
                key.next_segment = shared_len;
                key.phase = KeyPhase::Name;
            }
            KeyPhase::Name => {}
        }
        if content_path.is_within_leaf_object() {
            let field_name = if open_objects.is_empty() {
                std::mem::take(&mut key.original)
            } else {
                key.original
                    .splitn(key.next_segment + 1, '.')
                    .last()
                    .unwrap_or_default()
                    .to_string()
            };
            *pending_key = None;
            return Some((Token::FieldName(field_name), location));
        }
        let field_name = key.segments[key.next_segment].clone();
        key.next_segment += 1;
        if key.next_segment < key.segments.len() {
            key.phase = KeyPhase::Open;
        } else {
            *pending_key = None;
        }
        Some((Token::FieldName(field_name), location))
    }

    fn next_expanded_token(&mut self) -> Result<Option<(Token, TokenLocation)>, TokenError> {
        loop {
            if let Some(expanded) = self.advance_pending_key() {
                return Ok(Some(expanded));
            }
            let (token, location) = match self.deferred.take() {
                Some(deferred) => deferred,
                None => match self.inner.next_token()? {
                    Some(token) => (token, self.inner.token_location()),
                    None => return Ok(None),
                },
            };
            match token {
                Token::FieldName(field_name) => {
                    let has_open_objects = self
                        .levels
                        .last()
                        .map_or(false, |level| !level.open_objects.is_empty());
                    if !field_name.contains('.') && !has_open_objects {
                        return Ok(Some((Token::FieldName(field_name), location)));
                    }
                    let segments = split_field_name(&field_name);
                    self.pending_key = Some(PendingKey {
                        original: field_name,
                        segments,
                        next_segment: 0,
                        phase: KeyPhase::Align,
                        location,
                    });
                }
                Token::EndObject => {
                    if let Some(level) = self.levels.last_mut() {
                        if level.open_objects.pop().is_some() {
                            self.deferred = Some((Token::EndObject, location));
                            return Ok(Some((Token::EndObject, location)));
                        }
                    }
                    self.levels.pop();
                    return Ok(Some((Token::EndObject, location)));
                }
                Token::EndArray => {
                    self.levels.pop();
                    return Ok(Some((Token::EndArray, location)));
                }
                Token::StartObject => {
                    self.levels.push(Level::new(true));
                    return Ok(Some((Token::StartObject, location)));
                }
                Token::StartArray => {
                    self.levels.push(Level::new(false));
                    return Ok(Some((Token::StartArray, location)));
                }
                scalar => return Ok(Some((scalar, location))),
            }
        }
    }
}

impl<S: TokenSource> TokenSource for DotExpandingTokenSource<S> {
    fn next_token(&mut self) -> Result<Option<Token>, TokenError> {
        let Some((token, location)) = self.next_expanded_token()? else {
            return Ok(None);
        };
        self.location = location;
        self.names.on_token(&token);
        Ok(Some(token))
    }

    fn current_token(&self) -> Option<&Token> {
        self.names.current_token()
    }

    fn current_name(&self) -> Option<&str> {
        self.names.current_name()
    }

    fn token_location(&self) -> TokenLocation {
        self.location
    }
}
