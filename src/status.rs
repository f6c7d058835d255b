use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

pub const BACKEND_NAME: &str = "circonus";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum StatusField {
    LastFlush,
    LastException,
}

/// Health of the backend, as Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendStatus {
    pub last_flush: u64,
    pub last_exception: u64,
}

impl BackendStatus {
    /// Both timestamps start at the daemon's startup time.
    pub fn new(startup_time: u64) -> Self {
        Self {
            last_flush: startup_time,
            last_exception: startup_time,
        }
    }

    pub fn get(
        &self,
        field: StatusField,
    ) -> u64 {
        match field {
            StatusField::LastFlush => self.last_flush,
            StatusField::LastException => self.last_exception,
        }
    }

    /// `(backend, stat, value)` triples for the daemon's status writer.
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, StatusField, u64)> + '_ {
        StatusField::iter().map(move |field| (BACKEND_NAME, field, self.get(field)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries() {
        let status = BackendStatus {
            last_flush: 20,
            last_exception: 10,
        };
        let entries: Vec<(&str, String, u64)> = status
            .entries()
            .map(|(backend, field, value)| (backend, field.to_string(), value))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("circonus", "last_flush".to_string(), 20),
                ("circonus", "last_exception".to_string(), 10),
            ]
        );
    }

    #[test]
    fn test_status_keys_are_snake_case() {
        let keys: Vec<String> = StatusField::iter().map(|field| field.to_string()).collect();
        assert_eq!(keys, vec!["last_flush", "last_exception"]);
    }

    #[test]
    fn test_new_uses_startup_time() {
        let status = BackendStatus::new(1234);
        assert_eq!(status.get(StatusField::LastFlush), 1234);
        assert_eq!(status.get(StatusField::LastException), 1234);
    }
}
