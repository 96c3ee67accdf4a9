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

//! Index-level settings consumed by the mapping layer.

mod config_format;
mod index_settings;

pub use config_format::ConfigFormat;
pub use index_settings::{
    AnalysisSettings, IndexSettings, MappingSettings, SearchSettings, BUILTIN_ANALYZERS,
    DEPTH_LIMIT_SETTING, NESTED_FIELDS_LIMIT_SETTING, NESTED_OBJECTS_LIMIT_SETTING,
    TOTAL_FIELDS_LIMIT_SETTING, ALLOW_EXPENSIVE_QUERIES_SETTING,
};
