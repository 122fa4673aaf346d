//! `esptool` as the external flash tool.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info};

use crate::error::{Error, Result};
use crate::flasher::{FlashJob, FlashTool, Invocation, ToolExit};

/// Executable names tried on the search path, in order.
#[cfg(not(windows))]
pub const TOOL_NAMES: &[&str] = &["esptool.py", "esptool"];

/// Executable names tried on the search path, in order.
#[cfg(windows)]
pub const TOOL_NAMES: &[&str] = &["esptool.py", "esptool.exe", "esptool.py.exe"];

/// Value for `--before` and `--after`.
///
/// Through the tunnel the DTR/RTS lines reach the host controller, not the
/// pendant, so any reset sequence would hit the wrong chip.
pub const RESET_MODE: &str = "no_reset";

/// Locates and runs `esptool`.
#[derive(Debug, Clone, Default)]
pub struct Esptool {
    explicit: Option<PathBuf>,
    search_path: Option<OsString>,
}

impl Esptool {
    /// Use this executable instead of searching for one.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.explicit = Some(program.into());
        self
    }

    /// Search this `PATH`-style list instead of the process environment.
    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    fn search(&self) -> Option<PathBuf> {
        let path = self
            .search_path
            .clone()
            .or_else(|| env::var_os("PATH"))?;

        env::split_paths(&path).find_map(|dir| {
            TOOL_NAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| is_executable(candidate))
        })
    }
}

impl FlashTool for Esptool {
    fn locate(&self) -> Result<PathBuf> {
        if let Some(program) = &self.explicit {
            return if is_executable(program) {
                debug!("Using configured flash tool {}", program.display());
                Ok(program.clone())
            } else {
                Err(Error::ToolNotFound {
                    searched: program
                        .display()
                        .to_string(),
                })
            };
        }

        match self.search() {
            Some(found) => {
                debug!("Found flash tool at {}", found.display());
                Ok(found)
            },
            None => Err(Error::ToolNotFound {
                searched: TOOL_NAMES.join(", "),
            }),
        }
    }

    fn build_invocation(&self, program: &Path, job: &FlashJob) -> Invocation {
        let mut args: Vec<OsString> = [
            "--chip",
            job.chip().esptool_name(),
            "--port",
            job.port(),
            "--baud",
            &job.baud().to_string(),
            "--before",
            RESET_MODE,
            "--after",
            RESET_MODE,
            // The RAM stub handshake does not survive the relay.
            "--no-stub",
        ]
        .iter()
        .map(OsString::from)
        .collect();

        args.push("write_flash".into());
        args.push(format!("{:#x}", job.address()).into());
        args.push(
            job.firmware()
                .as_os_str()
                .to_owned(),
        );

        Invocation {
            program: program.to_path_buf(),
            args,
        }
    }

    fn run(&mut self, invocation: &Invocation) -> Result<ToolExit> {
        info!("Running {invocation}");
        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;
        debug!("Flash tool exited with {status}");
        Ok(status.into())
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flasher::TargetChip;

    fn args_of(inv: &Invocation) -> Vec<String> {
        inv.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_build_invocation_matches_manual_strap_flow() {
        let job = FlashJob::new("/dev/ttyUSB0", "/tmp/pendant.bin");
        let inv = Esptool::default().build_invocation(Path::new("/usr/bin/esptool.py"), &job);

        assert_eq!(inv.program, PathBuf::from("/usr/bin/esptool.py"));
        assert_eq!(
            args_of(&inv),
            [
                "--chip",
                "esp32s3",
                "--port",
                "/dev/ttyUSB0",
                "--baud",
                "115200",
                "--before",
                "no_reset",
                "--after",
                "no_reset",
                "--no-stub",
                "write_flash",
                "0x0",
                "/tmp/pendant.bin",
            ]
        );
    }

    #[test]
    fn test_build_invocation_custom_job() {
        let job = FlashJob::new("COM5", "fw.bin")
            .with_chip(TargetChip::Esp32)
            .with_baud(230400)
            .with_address(0x10000);
        let args = args_of(&Esptool::default().build_invocation(Path::new("esptool"), &job));

        assert_eq!(&args[0..6], ["--chip", "esp32", "--port", "COM5", "--baud", "230400"]);
        assert_eq!(&args[args.len() - 2..], ["0x10000", "fw.bin"]);
    }

    #[test]
    fn test_build_invocation_never_resets_or_stubs() {
        for chip in [TargetChip::Esp32, TargetChip::Esp32C6, TargetChip::Esp8266] {
            let job = FlashJob::new("COM5", "fw.bin").with_chip(chip);
            let args = args_of(&Esptool::default().build_invocation(Path::new("esptool"), &job));

            let before = args.iter().position(|a| a == "--before").unwrap();
            let after = args.iter().position(|a| a == "--after").unwrap();
            assert_eq!(args[before + 1], "no_reset");
            assert_eq!(args[after + 1], "no_reset");
            assert!(args.iter().any(|a| a == "--no-stub"));
            assert!(
                !args
                    .iter()
                    .any(|a| a.contains("default_reset") || a.contains("hard_reset"))
            );
        }
    }

    #[test]
    fn test_locate_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Esptool::default().with_search_path(dir.path());

        match tool.locate() {
            Err(Error::ToolNotFound { searched }) => assert!(searched.contains("esptool")),
            other => panic!("expected ToolNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_locate_missing_explicit_program() {
        let tool = Esptool::default().with_program("/nonexistent/esptool.py");
        assert!(matches!(tool.locate(), Err(Error::ToolNotFound { .. })));
    }

    #[cfg(unix)]
    fn install_fake_tool(dir: &Path, name: &str, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_prefers_first_known_name() {
        let dir = tempfile::tempdir().unwrap();
        install_fake_tool(dir.path(), "esptool", "#!/bin/sh\nexit 0\n");
        let preferred = install_fake_tool(dir.path(), "esptool.py", "#!/bin/sh\nexit 0\n");

        let tool = Esptool::default().with_search_path(dir.path());
        assert_eq!(tool.locate().unwrap(), preferred);
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_skips_non_executable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("esptool.py"), "not a program").unwrap();

        let tool = Esptool::default().with_search_path(dir.path());
        assert!(tool.locate().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let ok = install_fake_tool(dir.path(), "ok.sh", "#!/bin/sh\nexit 0\n");
        let bad = install_fake_tool(dir.path(), "bad.sh", "#!/bin/sh\nexit 2\n");
        let job = FlashJob::new("/dev/null", "fw.bin");
        let mut tool = Esptool::default();

        let inv = tool.build_invocation(&ok, &job);
        assert!(tool.run(&inv).unwrap().success());

        let inv = tool.build_invocation(&bad, &job);
        assert_eq!(tool.run(&inv).unwrap().code(), Some(2));
    }

    #[test]
    fn test_run_launch_failure_is_err() {
        let job = FlashJob::new("/dev/null", "fw.bin");
        let mut tool = Esptool::default();
        let inv = tool.build_invocation(Path::new("/nonexistent/esptool.py"), &job);
        assert!(matches!(tool.run(&inv), Err(Error::Io(_))));
    }
}
