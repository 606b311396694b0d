use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);

/// Opaque identifier for one placed call, issued by the call backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSid(pub String);

impl fmt::Display for CallSid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account record as the backend returns it. `call_credits` is the billing
/// balance in credit units (one credit per second of call time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub call_credits: i64,
}

/// Minimum balance required to start a call: one minute at the backend's
/// billing granularity.
pub const MIN_CALL_CREDITS: i64 = 60;

/// Longest destination the dial pad accepts, country prefix excluded.
pub const MAX_DESTINATION_DIGITS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountryCode {
    pub prefix: &'static str,
    pub label: &'static str,
}

pub const DEFAULT_COUNTRY_CODE: CountryCode = COUNTRY_CODES[0];

/// Dial prefixes offered by the country selector.
pub const COUNTRY_CODES: &[CountryCode] = &[
    CountryCode { prefix: "+1", label: "US" },
    CountryCode { prefix: "+44", label: "UK" },
    CountryCode { prefix: "+91", label: "IN" },
    CountryCode { prefix: "+61", label: "AU" },
    CountryCode { prefix: "+86", label: "CN" },
    CountryCode { prefix: "+81", label: "JP" },
    CountryCode { prefix: "+49", label: "DE" },
    CountryCode { prefix: "+33", label: "FR" },
    CountryCode { prefix: "+39", label: "IT" },
    CountryCode { prefix: "+34", label: "ES" },
    CountryCode { prefix: "+93", label: "AF" },
    CountryCode { prefix: "+973", label: "BH" },
    CountryCode { prefix: "+880", label: "BD" },
    CountryCode { prefix: "+975", label: "BT" },
    CountryCode { prefix: "+673", label: "BN" },
    CountryCode { prefix: "+855", label: "KH" },
    CountryCode { prefix: "+62", label: "ID" },
    CountryCode { prefix: "+98", label: "IR" },
    CountryCode { prefix: "+964", label: "IQ" },
    CountryCode { prefix: "+962", label: "JO" },
    CountryCode { prefix: "+7", label: "KZ" },
    CountryCode { prefix: "+965", label: "KW" },
    CountryCode { prefix: "+996", label: "KG" },
    CountryCode { prefix: "+856", label: "LA" },
    CountryCode { prefix: "+961", label: "LB" },
    CountryCode { prefix: "+960", label: "MV" },
    CountryCode { prefix: "+976", label: "MN" },
    CountryCode { prefix: "+95", label: "MM" },
    CountryCode { prefix: "+977", label: "NP" },
    CountryCode { prefix: "+968", label: "OM" },
    CountryCode { prefix: "+92", label: "PK" },
    CountryCode { prefix: "+970", label: "PS" },
    CountryCode { prefix: "+63", label: "PH" },
    CountryCode { prefix: "+974", label: "QA" },
    CountryCode { prefix: "+82", label: "KR" },
    CountryCode { prefix: "+94", label: "LK" },
    CountryCode { prefix: "+963", label: "SY" },
    CountryCode { prefix: "+886", label: "TW" },
    CountryCode { prefix: "+66", label: "TH" },
    CountryCode { prefix: "+90", label: "TR" },
    CountryCode { prefix: "+993", label: "TM" },
    CountryCode { prefix: "+971", label: "AE" },
    CountryCode { prefix: "+998", label: "UZ" },
    CountryCode { prefix: "+84", label: "VN" },
    CountryCode { prefix: "+967", label: "YE" },
    CountryCode { prefix: "+60", label: "MY" },
];

/// Whether `digit` is one of the twelve dial-pad keys.
pub fn is_pad_digit(digit: char) -> bool {
    digit.is_ascii_digit() || digit == '*' || digit == '#'
}
