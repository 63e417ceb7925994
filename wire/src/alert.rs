use crate::Error;

/// Severity of an alert. A fatal alert terminates the session; a warning is
/// surfaced to the caller but leaves the session usable.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AlertLevel {
    Warning,
    Fatal,
}

impl AlertLevel {
    pub fn code(&self) -> u8 {
        match self {
            AlertLevel::Warning => 1,
            AlertLevel::Fatal => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, Error> {
        match code {
            1 => Ok(AlertLevel::Warning),
            2 => Ok(AlertLevel::Fatal),
            _ => Err(Error::UnknownAlertLevel(code)),
        }
    }
}

/// Alert codes, numbered in the TLS tradition so packet captures read
/// familiarly.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AlertCode {
    CloseNotify,
    BadRecordMac,
    HandshakeFailure,
    UnsupportedVersion,
    UnsupportedSuite,
    InternalError,
}

impl AlertCode {
    pub fn id(&self) -> u16 {
        match self {
            AlertCode::CloseNotify => 0,
            AlertCode::BadRecordMac => 20,
            AlertCode::HandshakeFailure => 40,
            AlertCode::UnsupportedVersion => 70,
            AlertCode::UnsupportedSuite => 71,
            AlertCode::InternalError => 80,
        }
    }

    pub fn from_id(id: u16) -> Result<Self, Error> {
        match id {
            0 => Ok(AlertCode::CloseNotify),
            20 => Ok(AlertCode::BadRecordMac),
            40 => Ok(AlertCode::HandshakeFailure),
            70 => Ok(AlertCode::UnsupportedVersion),
            71 => Ok(AlertCode::UnsupportedSuite),
            80 => Ok(AlertCode::InternalError),
            _ => Err(Error::UnknownAlertCode(id)),
        }
    }
}

/// A decoded alert record.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Alert {
    pub level: AlertLevel,
    pub code: AlertCode,
    pub description: String,
}

impl Alert {
    pub fn fatal(code: AlertCode, description: impl Into<String>) -> Self {
        Alert {
            level: AlertLevel::Fatal,
            code,
            description: description.into(),
        }
    }

    pub fn close_notify() -> Self {
        Alert {
            level: AlertLevel::Warning,
            code: AlertCode::CloseNotify,
            description: String::new(),
        }
    }

    pub fn is_close_notify(&self) -> bool {
        self.code == AlertCode::CloseNotify
    }
}
