//! Start the release's debug image with a core file mounted.

use crate::config::CoredumpConfig;
use crate::error::Result;
use crate::process::run_interactive;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use tempfile::NamedTempFile;
use tracing::{info, warn};

const CORE_TARGET: &str = "/core";
const ENTRYPOINT_TARGET: &str = "/entry.sh";
const GDBINIT_TARGET: &str = "/root/.config/gdb/gdbinit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Open gdb on the core and hand over the terminal.
    Interactive,
    /// Print a full backtrace and exit.
    StackTrace,
}

impl SessionMode {
    pub fn shell_commands(&self, binary: &str) -> String {
        let unpack = "tar xzf envoy_source.tgz\n\
                      tar xzf envoy_dwo.tgz\n\
                      mv -f */execroot/envoy/bazel-out .\n";
        match self {
            SessionMode::Interactive => format!("{}gdb {} core\n", unpack, binary),
            SessionMode::StackTrace => format!(
                "{}gdb {} -ex \"where -full\" -ex \"quit\" core\necho exit\n",
                unpack, binary
            ),
        }
    }

    pub fn gdb_init(&self) -> &'static str {
        match self {
            SessionMode::Interactive => "",
            SessionMode::StackTrace => "set pagination off\n",
        }
    }
}

/// Image tag for the first of a comma-separated tag list, and whether more
/// than one tag was given.
pub fn image_tag(tags: &str, prefix: &str) -> (String, bool) {
    let mut list = tags.split(", ");
    let first = list.next().unwrap_or_default();
    let tag = first.replace(prefix, "");
    (tag, list.next().is_some())
}

/// Everything `docker run` needs, kept separate from the temp files so the
/// command line can be built and inspected on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerRun {
    pub image: String,
    pub tag: String,
    pub container_name: String,
    pub core: PathBuf,
    pub entrypoint: PathBuf,
    pub gdbinit: PathBuf,
}

impl DockerRun {
    pub fn args(&self) -> Vec<String> {
        vec![
            "run".to_string(),
            "-it".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            self.container_name.clone(),
            "--cap-add=SYS_PTRACE".to_string(),
            "--security-opt".to_string(),
            "seccomp=unconfined".to_string(),
            "--mount".to_string(),
            bind_mount(&self.core, CORE_TARGET),
            "--mount".to_string(),
            bind_mount(&self.entrypoint, ENTRYPOINT_TARGET),
            "--mount".to_string(),
            bind_mount(&self.gdbinit, GDBINIT_TARGET),
            format!("{}:{}", self.image, self.tag),
            "bash".to_string(),
            ENTRYPOINT_TARGET.to_string(),
        ]
    }

    pub fn command_line(&self) -> String {
        format!("docker {}", self.args().join(" "))
    }
}

fn bind_mount(source: &Path, target: &str) -> String {
    format!("type=bind,source={},target={}", source.display(), target)
}

/// A prepared container run. The entrypoint and gdb init files live as long
/// as the session and are removed when it is dropped.
pub struct DebugSession {
    pub docker: DockerRun,
    pub mode: SessionMode,
    pub shell_commands: String,
    _entrypoint: NamedTempFile,
    _gdbinit: NamedTempFile,
}

impl DebugSession {
    pub fn prepare(
        config: &CoredumpConfig,
        tags: &str,
        core: &Path,
        mode: SessionMode,
    ) -> Result<Self> {
        let (tag, multiple) = image_tag(tags, &config.tag_prefix);
        if multiple {
            warn!("More than one tag given, using first one ({})", tag);
        }

        let shell_commands = mode.shell_commands(&config.binary);
        let entrypoint = temp_file_with(&shell_commands, 0o755)?;
        let gdbinit = temp_file_with(mode.gdb_init(), 0o644)?;

        // The core file has to be executable inside the image.
        set_mode(core, 0o755)?;
        let core = fs::canonicalize(core)?;

        Ok(Self {
            docker: DockerRun {
                image: config.image.clone(),
                tag,
                container_name: config.container_name.clone(),
                core,
                entrypoint: entrypoint.path().to_path_buf(),
                gdbinit: gdbinit.path().to_path_buf(),
            },
            mode,
            shell_commands,
            _entrypoint: entrypoint,
            _gdbinit: gdbinit,
        })
    }

    /// Run the container in the foreground; temp files are removed on return.
    pub fn run(self) -> Result<ExitStatus> {
        info!("Starting {}:{}", self.docker.image, self.docker.tag);
        let status = run_interactive(Command::new("docker").args(self.docker.args()))?;
        info!("Debug container exited with {}", status);
        Ok(status)
    }
}

fn temp_file_with(content: &str, mode: u32) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix("drcrash-").tempfile()?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    set_mode(file.path(), mode)?;
    Ok(file)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> CoredumpConfig {
        CoredumpConfig {
            image: "registry.local/envoy-debug".to_string(),
            ..CoredumpConfig::default()
        }
    }

    #[test]
    fn test_image_tag_strips_prefix() {
        assert_eq!(
            image_tag("envoy-v1.29.4-3", "envoy-v"),
            ("1.29.4-3".to_string(), false)
        );
        assert_eq!(
            image_tag("envoy-v1.29.4-3, v1.29.4-3", "envoy-v"),
            ("1.29.4-3".to_string(), true)
        );
    }

    #[test]
    fn test_stacktrace_commands() {
        let cmds = SessionMode::StackTrace.shell_commands("/usr/local/bin/envoy");
        assert!(cmds.starts_with("tar xzf envoy_source.tgz\ntar xzf envoy_dwo.tgz\n"));
        assert!(cmds.contains("gdb /usr/local/bin/envoy -ex \"where -full\" -ex \"quit\" core\n"));
        assert!(cmds.ends_with("echo exit\n"));
        assert_eq!(SessionMode::StackTrace.gdb_init(), "set pagination off\n");
        assert_eq!(SessionMode::Interactive.gdb_init(), "");
    }

    #[test]
    fn test_docker_args() {
        let docker = DockerRun {
            image: "registry.local/envoy-debug".to_string(),
            tag: "1.29.4-3".to_string(),
            container_name: "envoy-core-dump".to_string(),
            core: PathBuf::from("/tmp/core.123"),
            entrypoint: PathBuf::from("/tmp/entry"),
            gdbinit: PathBuf::from("/tmp/init"),
        };

        let args = docker.args();
        assert_eq!(&args[..3], &["run", "-it", "--rm"]);
        assert!(args.contains(&"type=bind,source=/tmp/core.123,target=/core".to_string()));
        assert!(args.contains(&"type=bind,source=/tmp/entry,target=/entry.sh".to_string()));
        assert!(args.contains(
            &"type=bind,source=/tmp/init,target=/root/.config/gdb/gdbinit".to_string()
        ));
        assert_eq!(
            &args[args.len() - 3..],
            &["registry.local/envoy-debug:1.29.4-3", "bash", "/entry.sh"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_prepare_writes_and_cleans_temp_files() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let core = dir.path().join("core.4242");
        std::fs::write(&core, b"\x7fELF").unwrap();

        let session = DebugSession::prepare(
            &config(),
            "envoy-v1.29.4-3",
            &core,
            SessionMode::StackTrace,
        )
        .unwrap();

        let entrypoint = session.docker.entrypoint.clone();
        let gdbinit = session.docker.gdbinit.clone();
        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;

        assert_eq!(mode(&entrypoint), 0o755);
        assert_eq!(mode(&gdbinit), 0o644);
        assert_eq!(mode(&core), 0o755);
        assert_eq!(
            std::fs::read_to_string(&gdbinit).unwrap(),
            "set pagination off\n"
        );
        assert_eq!(session.docker.tag, "1.29.4-3");
        assert!(session.docker.core.is_absolute());

        drop(session);
        assert!(!entrypoint.exists());
        assert!(!gdbinit.exists());
    }
}
