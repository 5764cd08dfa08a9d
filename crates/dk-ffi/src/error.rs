use std::cell::RefCell;
use std::ffi::CString;

use dk_session::{Error, VocabError};

use crate::types::DkStatus;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message for later retrieval via `dk_last_error`.
pub fn set_last_error(msg: impl Into<String>) {
    // interior NULs would make the message unrepresentable in C
    let msg = msg.into().replace('\0', " ");
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Take the last error message, leaving `None` in its place.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Record `err` as the thread's last error and map it to a status.
pub fn report(err: &Error) -> DkStatus {
    set_last_error(err.to_string());
    match err {
        Error::ModelLoad { .. } => DkStatus::ErrorModelLoad,
        Error::ContextCreate(_) => DkStatus::ErrorContextCreate,
        Error::Decode(_) => DkStatus::ErrorDecode,
        Error::Batch(_) => DkStatus::ErrorBatch,
        Error::Vocab(VocabError::BufferTooSmall { .. }) => DkStatus::ErrorBufferTooSmall,
        Error::Vocab(_) | Error::Sampler(_) => DkStatus::ErrorInvalidArgument,
        Error::LogitsUnavailable(_) => DkStatus::ErrorLogitsUnavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_error_is_taken_once() {
        set_last_error("bad\0thing");
        assert_eq!(take_last_error().unwrap().to_str().unwrap(), "bad thing");
        assert!(take_last_error().is_none());
    }

    #[test]
    fn test_report_maps_status() {
        let err = Error::from(VocabError::BufferTooSmall { required: 9 });
        assert_eq!(report(&err), DkStatus::ErrorBufferTooSmall);
        assert!(take_last_error().is_some());
        assert_eq!(report(&Error::LogitsUnavailable(-1)), DkStatus::ErrorLogitsUnavailable);
    }
}
