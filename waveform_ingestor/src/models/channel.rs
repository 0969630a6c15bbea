//! Fixed-width seismic channel identifiers.
//!
//! A [`ChannelKey`] is the 12-character `NNSSSSSCCCLL` form used by the work
//! queue and the holdings tables: network (2), station (5), channel (3) and
//! location (2), each space-padded on the right. The dotted FDSN form
//! `NET.STA.LOC.CHA` is accepted on input and used for display.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const NET_LEN: usize = 2;
const STA_LEN: usize = 5;
const CHA_LEN: usize = 3;
const LOC_LEN: usize = 2;

/// Total width of the fixed form.
pub const CHANNEL_KEY_LEN: usize = NET_LEN + STA_LEN + CHA_LEN + LOC_LEN;

/// Errors produced while parsing a channel key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelKeyError {
    /// One of the components is longer than its fixed width.
    #[error("{part} {value:?} is longer than {max} characters")]
    TooLong {
        /// Component name.
        part: &'static str,
        /// Offending value.
        value: String,
        /// Allowed width.
        max: usize,
    },
    /// Only printable ASCII is allowed.
    #[error("channel key {0:?} contains non-ASCII or control characters")]
    InvalidCharacters(String),
    /// Dotted form must have exactly four parts.
    #[error("expected NET.STA.LOC.CHA, got {0:?}")]
    BadDottedForm(String),
}

/// Network/station/channel/location key in fixed-width, space-padded form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelKey(String);

fn pad(part: &'static str, value: &str, width: usize) -> Result<String, ChannelKeyError> {
    let value = value.trim();
    if value.len() > width {
        return Err(ChannelKeyError::TooLong {
            part,
            value: value.to_string(),
            max: width,
        });
    }
    Ok(format!("{value:<width$}"))
}

impl ChannelKey {
    /// Build a key from its components. Blank location is allowed.
    pub fn new(
        network: &str,
        station: &str,
        channel: &str,
        location: &str,
    ) -> Result<Self, ChannelKeyError> {
        let fixed = format!(
            "{}{}{}{}",
            pad("network", network, NET_LEN)?,
            pad("station", station, STA_LEN)?,
            pad("channel", channel, CHA_LEN)?,
            pad("location", location, LOC_LEN)?,
        );
        if !fixed.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
            return Err(ChannelKeyError::InvalidCharacters(fixed));
        }
        Ok(Self(fixed))
    }

    /// Parse the 12-character fixed form. Shorter input is padded.
    pub fn from_fixed(s: &str) -> Result<Self, ChannelKeyError> {
        if !s.is_ascii() {
            return Err(ChannelKeyError::InvalidCharacters(s.to_string()));
        }
        let width = CHANNEL_KEY_LEN;
        let padded = format!("{s:<width$}");
        if padded.len() > CHANNEL_KEY_LEN {
            return Err(ChannelKeyError::TooLong {
                part: "channel key",
                value: s.to_string(),
                max: CHANNEL_KEY_LEN,
            });
        }
        let (net, rest) = padded.split_at(NET_LEN);
        let (sta, rest) = rest.split_at(STA_LEN);
        let (cha, loc) = rest.split_at(CHA_LEN);
        Self::new(net, sta, cha, loc)
    }

    /// The fixed-width representation stored in the database.
    pub fn as_fixed(&self) -> &str {
        &self.0
    }

    /// Network code, trimmed.
    pub fn network(&self) -> &str {
        self.0[..NET_LEN].trim_end()
    }

    /// Station code, trimmed.
    pub fn station(&self) -> &str {
        self.0[NET_LEN..NET_LEN + STA_LEN].trim_end()
    }

    /// Channel code, trimmed.
    pub fn channel(&self) -> &str {
        self.0[NET_LEN + STA_LEN..NET_LEN + STA_LEN + CHA_LEN].trim_end()
    }

    /// Location code, trimmed (may be empty).
    pub fn location(&self) -> &str {
        self.0[NET_LEN + STA_LEN + CHA_LEN..].trim_end()
    }

    /// The fixed-width network+station prefix shared by every channel of a station.
    pub fn station_prefix(&self) -> &str {
        &self.0[..NET_LEN + STA_LEN]
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network(),
            self.station(),
            self.location(),
            self.channel()
        )
    }
}

impl FromStr for ChannelKey {
    type Err = ChannelKeyError;

    /// Accepts `NET.STA.LOC.CHA` or the fixed-width form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('.') {
            let parts: Vec<&str> = s.split('.').collect();
            match parts.as_slice() {
                [net, sta, loc, cha] => Self::new(net, sta, cha, loc),
                _ => Err(ChannelKeyError::BadDottedForm(s.to_string())),
            }
        } else {
            Self::from_fixed(s)
        }
    }
}

impl TryFrom<String> for ChannelKey {
    type Error = ChannelKeyError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelKey> for String {
    fn from(value: ChannelKey) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_form_maps_to_fixed_width() {
        let key: ChannelKey = "XX.ABC..BHZ".parse().unwrap();
        assert_eq!(key.as_fixed(), "XXABC  BHZ  ");
        assert_eq!(key.as_fixed().len(), CHANNEL_KEY_LEN);
        assert_eq!(key.network(), "XX");
        assert_eq!(key.station(), "ABC");
        assert_eq!(key.channel(), "BHZ");
        assert_eq!(key.location(), "");
        assert_eq!(key.to_string(), "XX.ABC..BHZ");
    }

    #[test]
    fn fixed_form_round_trips_through_display() {
        let key = ChannelKey::from_fixed("IUANMO BHZ00").unwrap();
        assert_eq!(key.to_string(), "IU.ANMO.00.BHZ");
        let again: ChannelKey = key.to_string().parse().unwrap();
        assert_eq!(again, key);
        assert_eq!(key.station_prefix(), "IUANMO ");
    }

    #[test]
    fn oversized_components_are_rejected() {
        let err = ChannelKey::new("XXX", "ABC", "BHZ", "").unwrap_err();
        assert!(matches!(err, ChannelKeyError::TooLong { part: "network", .. }));
        assert!("XX.ABC.BHZ".parse::<ChannelKey>().is_err());
    }
}
