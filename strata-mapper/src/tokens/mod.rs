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

//! Streaming token sources consumed by the document parser.

mod dot_expander;

use std::fmt;

use serde_json::{Number, Value as JsonValue};
use thiserror::Error;

pub use self::dot_expander::DotExpandingTokenSource;

/// A structural token of a JSON-like document.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    FieldName(String),
    String(String),
    Number(Number),
    Bool(bool),
    Null,
}

impl Token {
    pub fn is_value(&self) -> bool {
        matches!(
            self,
            Token::String(_) | Token::Number(_) | Token::Bool(_) | Token::Null
        )
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Token::StartObject => "START_OBJECT",
            Token::EndObject => "END_OBJECT",
            Token::StartArray => "START_ARRAY",
            Token::EndArray => "END_ARRAY",
            Token::FieldName(_) => "FIELD_NAME",
            Token::String(_) => "VALUE_STRING",
            Token::Number(_) => "VALUE_NUMBER",
            Token::Bool(_) => "VALUE_BOOLEAN",
            Token::Null => "VALUE_NULL",
        }
    }

    /// Converts a scalar token into a JSON value.
    pub(crate) fn into_json_scalar(self) -> Option<JsonValue> {
        match self {
            Token::String(text) => Some(JsonValue::String(text)),
            Token::Number(number) => Some(JsonValue::Number(number)),
            Token::Bool(bool_val) => Some(JsonValue::Bool(bool_val)),
            Token::Null => Some(JsonValue::Null),
            _ => None,
        }
    }
}

/// Position of a token in the underlying input, counted in tokens.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TokenLocation {
    pub token_offset: usize,
}

impl fmt::Display for TokenLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "token #{}", self.token_offset)
    }
}

/// Error reported by a token source, or raised when a token stream does not
/// describe a well-formed document.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("malformed token stream at {location}: {message}")]
pub struct TokenError {
    pub location: TokenLocation,
    pub message: String,
}

/// A pull-based stream of tokens.
pub trait TokenSource {
    /// Advances to the next token. Returns `None` once the stream is exhausted.
    fn next_token(&mut self) -> Result<Option<Token>, TokenError>;

    /// Token returned by the last call to `next_token`.
    fn current_token(&self) -> Option<&Token>;

    /// Name of the field the current token belongs to. For a start token, this
    /// is the name of the field holding the new container; inside an array it is
    /// `None`.
    fn current_name(&self) -> Option<&str>;

    /// Location of the current token.
    fn token_location(&self) -> TokenLocation;

    /// If the current token starts an object or an array, advances to its
    /// matching end token. Otherwise does nothing.
    fn skip_children(&mut self) -> Result<(), TokenError> {
        if !matches!(
            self.current_token(),
            Some(Token::StartObject) | Some(Token::StartArray)
        ) {
            return Ok(());
        }
        let mut depth = 1usize;
        while depth > 0 {
            match self.next_token()? {
                Some(Token::StartObject) | Some(Token::StartArray) => depth += 1,
                Some(Token::EndObject) | Some(Token::EndArray) => depth -= 1,
                Some(_) => {}
                None => {
                    return Err(TokenError {
                        location: self.token_location(),
                        message: "unexpected end of stream while skipping children".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

enum NameContext {
    Root,
    Object(Option<String>),
    Array,
}

/// Tracks field names the way a streaming JSON parser reports them.
pub(crate) struct NameTracker {
    contexts: Vec<NameContext>,
    current_token: Option<Token>,
}

impl Default for NameTracker {
    fn default() -> Self {
        NameTracker {
            contexts: vec![NameContext::Root],
            current_token: None,
        }
    }
}

impl NameTracker {
    pub fn on_token(&mut self, token: &Token) {
        match token {
            Token::StartObject => self.contexts.push(NameContext::Object(None)),
            Token::StartArray => self.contexts.push(NameContext::Array),
            Token::EndObject | Token::EndArray => {
                if self.contexts.len() > 1 {
                    self.contexts.pop();
                }
            }
            Token::FieldName(name) => {
                if let Some(NameContext::Object(current_name)) = self.contexts.last_mut() {
                    *current_name = Some(name.clone());
                }
            }
            _ => {}
        }
        self.current_token = Some(token.clone());
    }

    pub fn current_token(&self) -> Option<&Token> {
        self.current_token.as_ref()
    }

    pub fn current_name(&self) -> Option<&str> {
        let context_idx = match self.current_token {
            Some(Token::StartObject) | Some(Token::StartArray) => self.contexts.len().checked_sub(2)?,
            _ => self.contexts.len().checked_sub(1)?,
        };
        match &self.contexts[context_idx] {
            NameContext::Object(name) => name.as_deref(),
            NameContext::Root | NameContext::Array => None,
        }
    }
}

enum Frame {
    Object(serde_json::map::IntoIter),
    Array(std::vec::IntoIter<JsonValue>),
}

/// Walks an in-memory JSON value, in document order.
pub struct JsonValueTokenSource {
    frames: Vec<Frame>,
    pending_value: Option<JsonValue>,
    names: NameTracker,
    num_tokens: usize,
}

impl JsonValueTokenSource {
    pub fn new(json_value: JsonValue) -> JsonValueTokenSource {
        JsonValueTokenSource {
            frames: Vec::new(),
            pending_value: Some(json_value),
            names: NameTracker::default(),
            num_tokens: 0,
        }
    }

    fn open_value(&mut self, json_value: JsonValue) -> Token {
        match json_value {
            JsonValue::Object(json_obj) => {
                self.frames.push(Frame::Object(json_obj.into_iter()));
                Token::StartObject
            }
            JsonValue::Array(json_array) => {
                self.frames.push(Frame::Array(json_array.into_iter()));
                Token::StartArray
            }
            JsonValue::String(text) => Token::String(text),
            JsonValue::Number(number) => Token::Number(number),
            JsonValue::Bool(bool_val) => Token::Bool(bool_val),
            JsonValue::Null => Token::Null,
        }
    }
}

impl TokenSource for JsonValueTokenSource {
    fn next_token(&mut self) -> Result<Option<Token>, TokenError> {
        let token = if let Some(json_value) = self.pending_value.take() {
            self.open_value(json_value)
        } else {
            match self.frames.last_mut() {
                Some(Frame::Object(entries)) => match entries.next() {
                    Some((key, json_value)) => {
                        self.pending_value = Some(json_value);
                        Token::FieldName(key)
                    }
                    None => {
                        self.frames.pop();
                        Token::EndObject
                    }
                },
                Some(Frame::Array(elements)) => match elements.next() {
                    Some(json_value) => self.open_value(json_value),
                    None => {
                        self.frames.pop();
                        Token::EndArray
                    }
                },
                None => return Ok(None),
            }
        };
        self.num_tokens += 1;
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
        TokenLocation {
            token_offset: self.num_tokens.saturating_sub(1),
        }
    }
}

/// Replays a recorded sequence of tokens. Unlike [`JsonValueTokenSource`], it
/// can describe objects with duplicate keys.
pub struct VecTokenSource {
    tokens: std::vec::IntoIter<Token>,
    names: NameTracker,
    num_tokens: usize,
}

impl VecTokenSource {
    pub fn new(tokens: Vec<Token>) -> VecTokenSource {
        VecTokenSource {
            tokens: tokens.into_iter(),
            names: NameTracker::default(),
            num_tokens: 0,
        }
    }
}

impl TokenSource for VecTokenSource {
    fn next_token(&mut self) -> Result<Option<Token>, TokenError> {
        let Some(token) = self.tokens.next() else {
            return Ok(None);
        };
        self.num_tokens += 1;
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
        TokenLocation {
            token_offset: self.num_tokens.saturating_sub(1),
        }
    }
}

#[cfg(test)]
pub(crate) fn collect_tokens(token_source: &mut impl TokenSource) -> Vec<Token> {
    let mut tokens = Vec::new();
    while let Some(token) = token_source.next_token().unwrap() {
        tokens.push(token);
    }
    tokens
}

#[cfg(test)]
pub(crate) fn field(name: &str) -> Token {
    Token::FieldName(name.to_string())
}

#[cfg(test)]
pub(crate) fn num(val: i64) -> Token {
    Token::Number(Number::from(val))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_json_value_token_source_emits_document_order() {
        let mut token_source = JsonValueTokenSource::new(json!({
            "b": 1,
            "a": [true, null, {"c": "d"}],
        }));
        let tokens = collect_tokens(&mut token_source);
        assert_eq!(
            tokens,
            vec![
                Token::StartObject,
                field("b"),
                num(1),
                field("a"),
                Token::StartArray,
                Token::Bool(true),
                Token::Null,
                Token::StartObject,
                field("c"),
                Token::String("d".to_string()),
                Token::EndObject,
                Token::EndArray,
                Token::EndObject,
            ]
        );
        assert_eq!(token_source.token_location().token_offset, 12);
    }

    #[test]
    fn test_current_name_tracks_enclosing_field() {
        let mut token_source = JsonValueTokenSource::new(json!({"a": {"b": [1]}}));
        let mut names = Vec::new();
        while let Some(token) = token_source.next_token().unwrap() {
            names.push((token, token_source.current_name().map(str::to_string)));
        }
        let expected: Vec<(Token, Option<String>)> = vec![
            (Token::StartObject, None),
            (field("a"), Some("a".to_string())),
            (Token::StartObject, Some("a".to_string())),
            (field("b"), Some("b".to_string())),
            (Token::StartArray, Some("b".to_string())),
            (num(1), None),
            (Token::EndArray, Some("b".to_string())),
            (Token::EndObject, Some("a".to_string())),
            (Token::EndObject, None),
        ];
        assert_eq!(names, expected);
    }

    #[test]
    fn test_skip_children() {
        let mut token_source = VecTokenSource::new(vec![
            Token::StartObject,
            field("a"),
            Token::StartObject,
            field("b"),
            Token::StartArray,
            num(1),
            Token::EndArray,
            Token::EndObject,
            field("c"),
            num(2),
            Token::EndObject,
        ]);
        token_source.next_token().unwrap();
        token_source.next_token().unwrap();
        assert_eq!(token_source.next_token().unwrap(), Some(Token::StartObject));
        token_source.skip_children().unwrap();
        assert_eq!(token_source.current_token(), Some(&Token::EndObject));
        assert_eq!(token_source.next_token().unwrap(), Some(field("c")));
        // Skipping on a scalar is a no-op.
        token_source.next_token().unwrap();
        token_source.skip_children().unwrap();
        assert_eq!(token_source.current_token(), Some(&num(2)));
    }

    #[test]
    fn test_skip_children_on_truncated_stream_fails() {
        let mut token_source =
            VecTokenSource::new(vec![Token::StartObject, field("a"), num(1)]);
        token_source.next_token().unwrap();
        let error = token_source.skip_children().unwrap_err();
        assert!(error.message.contains("unexpected end of stream"));
    }
}
