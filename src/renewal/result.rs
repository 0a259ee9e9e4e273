use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// What one renewal cycle asks the caller to do next. Several flags may be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewResult {
    pub error: bool,
    pub exit_requested: bool,
    pub auth_token_expiring: bool,
    pub db_credentials_expiring: bool,
}

impl RenewResult {
    pub const NONE: Self = Self {
        error: false,
        exit_requested: false,
        auth_token_expiring: false,
        db_credentials_expiring: false,
    };
    pub const ERROR: Self = Self {
        error: true,
        ..Self::NONE
    };
    pub const EXIT_REQUESTED: Self = Self {
        exit_requested: true,
        ..Self::NONE
    };
    pub const AUTH_TOKEN_EXPIRING: Self = Self {
        auth_token_expiring: true,
        ..Self::NONE
    };
    pub const DB_CREDENTIALS_EXPIRING: Self = Self {
        db_credentials_expiring: true,
        ..Self::NONE
    };

    /// True if every flag set in `other` is also set in `self`.
    pub fn contains(self, other: Self) -> bool {
        (self | other) == self
    }

    pub fn is_empty(self) -> bool {
        self == Self::NONE
    }
}

impl BitOr for RenewResult {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            error: self.error || rhs.error,
            exit_requested: self.exit_requested || rhs.exit_requested,
            auth_token_expiring: self.auth_token_expiring || rhs.auth_token_expiring,
            db_credentials_expiring: self.db_credentials_expiring || rhs.db_credentials_expiring,
        }
    }
}

impl BitOrAssign for RenewResult {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

impl fmt::Display for RenewResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.error, "error"),
            (self.exit_requested, "exit_requested"),
            (self.auth_token_expiring, "auth_token_expiring"),
            (self.db_credentials_expiring, "db_credentials_expiring"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter_map(|(on, name)| on.then_some(*name))
            .collect();
        if set.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&set.join("|"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine_independently() {
        let both = RenewResult::AUTH_TOKEN_EXPIRING | RenewResult::DB_CREDENTIALS_EXPIRING;
        assert!(both.contains(RenewResult::AUTH_TOKEN_EXPIRING));
        assert!(both.contains(RenewResult::DB_CREDENTIALS_EXPIRING));
        assert!(!both.contains(RenewResult::EXIT_REQUESTED));
        assert!(!both.error);

        let mut acc = RenewResult::NONE;
        assert!(acc.is_empty());
        acc |= RenewResult::ERROR;
        assert!(acc.error);
        assert!(!acc.is_empty());
    }

    #[test]
    fn display_lists_set_flags() {
        let both = RenewResult::AUTH_TOKEN_EXPIRING | RenewResult::DB_CREDENTIALS_EXPIRING;
        assert_eq!(both.to_string(), "auth_token_expiring|db_credentials_expiring");
        assert_eq!(RenewResult::NONE.to_string(), "none");
    }
}
