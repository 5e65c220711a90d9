//! Key alias naming.
//!
//! Rotating server keys are named after the calendar day they cover,
//! `server-key-<yyyymmdd>`. The remaining entries use fixed, well-known
//! aliases.

use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fmt;
use tracekeep_core::EpochClock;

pub const SERVER_KEY_PREFIX: &str = "server-key-";
pub const FEDERATION_KEY_ALIAS: &str = "federation-key";
pub const CLIENT_KEK_ALIAS: &str = "key-encryption-key";
pub const SERVER_EXCHANGE_KEY_ALIAS: &str = "register-key";

const SERVER_KEY_DATE_FORMAT: &str = "%Y%m%d";

/// What a key entry is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Per-day key encrypting the rotating identifiers.
    ServerDayKey,
    /// Shared symmetric key for cross-operator interoperability.
    Federation,
    /// Key encrypting client keys at rest.
    ClientKeyEncryption,
    /// Server key pair used for client key agreement.
    ServerExchange,
}

/// Identifier of one entry in the keystore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyAlias(String);

impl KeyAlias {
    pub fn new(alias: impl Into<String>) -> Self {
        Self(alias.into())
    }

    pub fn server_key(date: NaiveDate) -> Self {
        Self(format!(
            "{}{}",
            SERVER_KEY_PREFIX,
            date.format(SERVER_KEY_DATE_FORMAT)
        ))
    }

    /// Alias of the day key for a day number of `clock`, `None` only when
    /// the day falls outside the representable calendar.
    pub fn server_key_for_day(clock: &EpochClock, day: i64) -> Option<Self> {
        clock.date_of_day(day).map(Self::server_key)
    }

    pub fn federation() -> Self {
        Self(FEDERATION_KEY_ALIAS.to_string())
    }

    pub fn client_kek() -> Self {
        Self(CLIENT_KEK_ALIAS.to_string())
    }

    pub fn server_exchange() -> Self {
        Self(SERVER_EXCHANGE_KEY_ALIAS.to_string())
    }

    /// Alias of a non-rotating purpose.
    pub fn fixed(purpose: KeyPurpose) -> Option<Self> {
        match purpose {
            KeyPurpose::ServerDayKey => None,
            KeyPurpose::Federation => Some(Self::federation()),
            KeyPurpose::ClientKeyEncryption => Some(Self::client_kek()),
            KeyPurpose::ServerExchange => Some(Self::server_exchange()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Date covered by a server day key alias.
    pub fn server_key_date(&self) -> Option<NaiveDate> {
        parse_server_key_date(&self.0)
    }

    pub fn purpose(&self) -> Option<KeyPurpose> {
        match self.0.as_str() {
            FEDERATION_KEY_ALIAS => Some(KeyPurpose::Federation),
            CLIENT_KEK_ALIAS => Some(KeyPurpose::ClientKeyEncryption),
            SERVER_EXCHANGE_KEY_ALIAS => Some(KeyPurpose::ServerExchange),
            other => parse_server_key_date(other).map(|_| KeyPurpose::ServerDayKey),
        }
    }
}

impl fmt::Display for KeyAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyAlias {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<KeyAlias> for String {
    fn from(alias: KeyAlias) -> Self {
        alias.0
    }
}

fn parse_server_key_date(alias: &str) -> Option<NaiveDate> {
    let suffix = alias.strip_prefix(SERVER_KEY_PREFIX)?;
    if suffix.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(suffix, SERVER_KEY_DATE_FORMAT).ok()
}

/// Days without a server key between the oldest and the newest one present.
pub fn missing_server_key_days<'a, I>(aliases: I) -> Vec<NaiveDate>
where
    I: IntoIterator<Item = &'a str>,
{
    let dates: BTreeSet<NaiveDate> = aliases
        .into_iter()
        .filter_map(parse_server_key_date)
        .collect();

    let (Some(first), Some(last)) = (dates.first().copied(), dates.last().copied()) else {
        return Vec::new();
    };

    first
        .iter_days()
        .take_while(|day| *day <= last)
        .filter(|day| !dates.contains(day))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_server_key_alias_format() {
        let alias = KeyAlias::server_key(date(2020, 6, 1));
        assert_eq!(alias.as_str(), "server-key-20200601");
        assert_eq!(alias.server_key_date(), Some(date(2020, 6, 1)));
        assert_eq!(alias.purpose(), Some(KeyPurpose::ServerDayKey));
    }

    #[test]
    fn test_alias_is_pure_function_of_day() {
        let clock = EpochClock::with_defaults(date(2020, 6, 1));
        assert_eq!(
            KeyAlias::server_key_for_day(&clock, 3),
            KeyAlias::server_key_for_day(&clock, 3)
        );
        assert_eq!(
            KeyAlias::server_key_for_day(&clock, 3).unwrap().as_str(),
            "server-key-20200604"
        );
    }

    #[test]
    fn test_fixed_aliases() {
        assert_eq!(
            KeyAlias::fixed(KeyPurpose::Federation).unwrap().as_str(),
            "federation-key"
        );
        assert_eq!(KeyAlias::fixed(KeyPurpose::ServerDayKey), None);
        assert_eq!(
            KeyAlias::server_exchange().purpose(),
            Some(KeyPurpose::ServerExchange)
        );
        assert_eq!(KeyAlias::new("server-key-2020").purpose(), None);
    }

    #[test]
    fn test_missing_days_are_reported() {
        let aliases = [
            "server-key-20200601",
            "server-key-20200604",
            "server-key-20200602",
            "federation-key",
        ];
        assert_eq!(
            missing_server_key_days(aliases),
            vec![date(2020, 6, 3)]
        );
        assert!(missing_server_key_days(["federation-key"]).is_empty());
    }
}
