//! System utilities: privileges, device nodes, external commands

use crate::error::{Result, StorageError};
use nix::sys::stat::{major, minor, stat, SFlag};
use std::path::Path;
use std::process::{Command, Output};

/// Check if running as root
pub fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

/// Major and minor number of a block device node, following symlinks.
///
/// Returns None if the path does not exist or is not a block device.
pub fn device_number(path: &Path) -> Option<(u32, u32)> {
    let st = stat(path).ok()?;

    let file_type = SFlag::from_bits_truncate(st.st_mode & SFlag::S_IFMT.bits());
    if file_type != SFlag::S_IFBLK {
        return None;
    }

    Some((major(st.st_rdev) as u32, minor(st.st_rdev) as u32))
}

/// Execute a command; exit codes other than 0 and `allowed_exit_codes` fail
pub fn execute(cmd: &mut Command, allowed_exit_codes: &[i32]) -> Result<Output> {
    let cmd_str = format!("{:?}", cmd);

    log::debug!("Executing: {}", cmd_str);
    let output = cmd.output()?;

    let code = output.status.code().unwrap_or(-1);
    if !output.status.success() && !allowed_exit_codes.contains(&code) {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StorageError::CommandFailed {
            cmd: cmd_str,
            code,
            stderr: stderr.to_string(),
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_number_of_regular_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(device_number(file.path()), None);
        assert_eq!(device_number(Path::new("/nonexistent/device")), None);
    }

    #[test]
    fn test_execute_reports_failure() {
        let err = execute(&mut Command::new("false"), &[]).unwrap_err();
        assert!(matches!(err, StorageError::CommandFailed { code: 1, .. }));
    }

    #[test]
    fn test_execute_allowed_exit_code() {
        let output = execute(&mut Command::new("false"), &[1]).unwrap();
        assert_eq!(output.status.code(), Some(1));
    }

    #[test]
    fn test_execute_captures_stdout() {
        let output = execute(Command::new("echo").arg("TYPE=ext4"), &[]).unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "TYPE=ext4");
    }
}
