use std::str::FromStr;
use std::time;

/// A duration parsed from an environment variable holding milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

/// A comma-separated list of HTTP status codes, e.g. `"404,410"`. An empty
/// string parses to an empty list.
#[derive(Debug, Clone, Default)]
pub struct StatusCodeList(pub Vec<u16>);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseStatusCodeListError(pub String);

impl FromStr for StatusCodeList {
    type Err = ParseStatusCodeListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut codes = Vec::new();
        for part in s.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let code = part
                .parse::<u16>()
                .map_err(|_| ParseStatusCodeListError(part.to_owned()))?;
            codes.push(code);
        }

        Ok(StatusCodeList(codes))
    }
}
