use std::path::Path;

/// Check whether the path exists on the host side.
pub fn is_valid_path(path: &str, error_message: String) -> Result<(), String> {
    if !Path::new(path).exists() {
        Err(error_message)
    } else {
        Ok(())
    }
}

/// Check whether the path exists and can be used as a rootfs.
pub fn path_validator(path: String) -> Result<(), String> {
    is_valid_path(path.as_str(), path.to_string() + " is not a valid path.")
}

/// Check whether a binding is of the form `host_path:guest_path` (or just
/// `host_path`, bound to the same path in the guest) and that the host side
/// exists.
pub fn binding_validator(binding_paths: String) -> Result<(), String> {
    let parts: Vec<&str> = binding_paths.split_terminator(':').collect();

    match parts.len() {
        1 | 2 => {
            let host_path: &str = parts[0];
            is_valid_path(host_path, host_path.to_string() + " is not a valid path.")
        }
        _ => Err("should be: host_path:guest_path".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_validator_correct_paths() {
        let correct_paths = [".", "./", "..", "../", "./.."];

        for path in &correct_paths {
            assert_eq!(path_validator(path.to_string()), Ok(()));
        }
    }

    #[test]
    fn test_path_validator_incorrect_paths() {
        let incorrect_paths = [
            "impossible path",
            "../../../../impossible path",
            "/\\/",
            "\'`",
        ];

        for path in &incorrect_paths {
            assert_eq!(
                path_validator(path.to_string()),
                Err(path.to_string() + " is not a valid path.")
            );
        }
    }

    #[test]
    fn test_binding_validator_correct_bindings() {
        let correct_bindings = [".:.", "..:..", ".:../../", ".:ignored", "."];

        for path in &correct_bindings {
            assert_eq!(binding_validator(path.to_string()), Ok(()));
        }
    }

    #[test]
    fn test_binding_validator_incorrect_bindings() {
        let incorrect_paths = ["..:..:..", ".:.:."];

        for path in &incorrect_paths {
            assert_eq!(
                binding_validator(path.to_string()),
                Err("should be: host_path:guest_path".to_string())
            );
        }
        assert_eq!(
            binding_validator("impossible path:.".to_string()),
            Err("impossible path is not a valid path.".to_string())
        );
    }
}
