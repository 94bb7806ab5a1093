// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Frame body codecs.

use std::fmt;
use std::str::FromStr;

pub use ::tokio_serde::formats::{Bincode, Json};

/// Transport serde codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Bincode codec using [bincode](https://docs.rs/bincode) crate.
    #[default]
    Bincode,
    /// JSON codec using [serde_json](https://docs.rs/serde_json) crate.
    Json,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Bincode => f.write_str("bincode"),
            Codec::Json => f.write_str("json"),
        }
    }
}

/// Unknown codec name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown codec {0:?}, expected `bincode` or `json`")]
pub struct UnknownCodec(pub String);

impl FromStr for Codec {
    type Err = UnknownCodec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bincode" => Ok(Codec::Bincode),
            "json" => Ok(Codec::Json),
            _ => Err(UnknownCodec(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names() {
        assert_eq!("bincode".parse::<Codec>(), Ok(Codec::Bincode));
        assert_eq!("JSON".parse::<Codec>(), Ok(Codec::Json));
        assert_eq!("cbor".parse::<Codec>(), Err(UnknownCodec("cbor".to_string())));
        assert_eq!(Codec::default().to_string(), "bincode");
    }
}
