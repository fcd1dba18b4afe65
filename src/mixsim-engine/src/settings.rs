// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use serde::{Deserialize, Serialize};

use crate::common::Result;
use crate::config_err;

/// Compile- and evaluation-time knobs shared by the tokenizer, the
/// expression compiler and the differentiator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Value of the `_TA` named constant, in kelvin.
    pub ambient_temperature: f64,
    pub fold_constants: bool,
    pub prune_constants: bool,
    /// Relative perturbation used by forward differencing.
    pub relative_step: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            ambient_temperature: 300.15,
            fold_constants: true,
            prune_constants: true,
            relative_step: 1e-9,
        }
    }
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Settings> {
        match serde_json::from_str(text) {
            Ok(settings) => Ok(settings),
            Err(err) => config_err!(BadSettings, err.to_string()),
        }
    }

    pub fn to_json(&self) -> String {
        // a struct of plain numbers and bools always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[test]
fn test_settings_defaults_from_partial_json() {
    let settings = Settings::from_json(r#"{"ambient_temperature": 310.0}"#).unwrap();
    assert_eq!(310.0, settings.ambient_temperature);
    assert!(settings.fold_constants);
    assert!(settings.prune_constants);
    assert_eq!(1e-9, settings.relative_step);
}

#[test]
fn test_settings_json_roundtrip() {
    let settings = Settings {
        fold_constants: false,
        ..Settings::default()
    };
    let text = settings.to_json();
    assert_eq!(settings, Settings::from_json(&text).unwrap());
}

#[test]
fn test_settings_bad_json() {
    use crate::common::{ErrorCode, ErrorKind};

    let err = Settings::from_json("{not json").unwrap_err();
    assert_eq!(ErrorKind::Configuration, err.kind);
    assert_eq!(ErrorCode::BadSettings, err.code);
    assert!(err.to_string().starts_with("ConfigurationError{bad_settings: "));

    let err = Settings::from_json(r#"{"relative_step": "small"}"#).unwrap_err();
    assert_eq!(ErrorCode::BadSettings, err.code);
}
