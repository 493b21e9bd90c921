//! Public return codes for manager operations.

use std::fmt;

/// Outcome of a manager operation.
///
/// Every code maps to a fixed human-readable message; a code is "truthy"
/// iff it is [`ReturnCode::Success`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Success,
    UnknownError,
    /// No plugin was found in the searched directory.
    SearchNothingFound,
    /// A candidate library carried metadata that could not be parsed.
    SearchCannotParseMetadata,
    /// A candidate library declared a name that is already registered.
    SearchNameAlreadyExists,
    /// The directory scan itself failed.
    SearchListFilesError,
    /// A dependency exists but in an incompatible version.
    LoadDependencyBadVersion,
    /// A declared dependency is not registered.
    LoadDependencyNotFound,
    /// The dependency graph contains a cycle.
    LoadDependencyCycle,
    /// At least one plugin could not be unloaded.
    UnloadNotAll,
}

impl ReturnCode {
    pub fn is_success(self) -> bool {
        self == ReturnCode::Success
    }

    /// The fixed message for this code.
    pub fn message(self) -> &'static str {
        match self {
            ReturnCode::Success => "Success",
            ReturnCode::UnknownError => "Unknown error",
            ReturnCode::SearchNothingFound => "No plugins was found in that directory",
            ReturnCode::SearchCannotParseMetadata => {
                "Plugins metadata cannot be parsed (maybe they are invalid ?)"
            }
            ReturnCode::SearchNameAlreadyExists => {
                "A plugin with the same name was already found"
            }
            ReturnCode::SearchListFilesError => {
                "An error occurs during the scan of the plugin dir"
            }
            ReturnCode::LoadDependencyBadVersion => {
                "The plugin requires a dependency that's in an incorrect version"
            }
            ReturnCode::LoadDependencyNotFound => {
                "The plugin requires a dependency that wasn't found"
            }
            ReturnCode::LoadDependencyCycle => {
                "The dependencies graph contains a cycle, which makes impossible to load plugins"
            }
            ReturnCode::UnloadNotAll => "Not all plugins have been unloaded",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl From<bool> for ReturnCode {
    fn from(value: bool) -> Self {
        if value {
            ReturnCode::Success
        } else {
            ReturnCode::UnknownError
        }
    }
}

/// Callback used to report per-plugin problems while an operation keeps
/// going. Invoked synchronously, before the operation returns; the detail
/// string (usually a library path) is only borrowed for the call.
pub type Callback<'a> = &'a mut dyn FnMut(ReturnCode, Option<&str>);

pub(crate) fn emit(callback: &mut Option<Callback<'_>>, code: ReturnCode, detail: Option<&str>) {
    if let Some(cb) = callback.as_mut() {
        cb(code, detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_truthy() {
        assert!(ReturnCode::Success.is_success());
        assert!(!ReturnCode::UnknownError.is_success());
        assert!(!ReturnCode::LoadDependencyCycle.is_success());
    }

    #[test]
    fn every_code_has_a_message() {
        let all = [
            ReturnCode::Success,
            ReturnCode::UnknownError,
            ReturnCode::SearchNothingFound,
            ReturnCode::SearchCannotParseMetadata,
            ReturnCode::SearchNameAlreadyExists,
            ReturnCode::SearchListFilesError,
            ReturnCode::LoadDependencyBadVersion,
            ReturnCode::LoadDependencyNotFound,
            ReturnCode::LoadDependencyCycle,
            ReturnCode::UnloadNotAll,
        ];
        for code in all {
            assert!(!code.message().is_empty());
            assert_eq!(code.to_string(), code.message());
        }
    }

    #[test]
    fn bool_conversion() {
        assert_eq!(ReturnCode::from(true), ReturnCode::Success);
        assert_eq!(ReturnCode::from(false), ReturnCode::UnknownError);
    }

    #[test]
    fn emit_forwards_to_callback() {
        let mut seen = Vec::new();
        {
            let mut cb: Option<Callback<'_>> = Some(&mut |code, detail: Option<&str>| {
                seen.push((code, detail.map(str::to_owned)));
            });
            emit(&mut cb, ReturnCode::SearchNothingFound, Some("/tmp/p"));
            emit(&mut cb, ReturnCode::Success, None);
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, ReturnCode::SearchNothingFound);
        assert_eq!(seen[0].1.as_deref(), Some("/tmp/p"));
    }

    #[test]
    fn emit_tolerates_no_callback() {
        let mut cb: Option<Callback<'_>> = None;
        emit(&mut cb, ReturnCode::UnloadNotAll, None);
    }
}
