//! Foundry that shells out to an external builder program.
//!
//! The builder is invoked as:
//!
//! ```text
//! <program> build --platform <os>/<arch> -d <name>=<module>@<version>... -o <path>
//! ```
//!
//! and must write the binary to `<path>`. The CGO toggle is forwarded via
//! `CGO_ENABLED`; additional build environment variables come from
//! configuration. On success the binary is streamed from the output path
//! into the caller's sink while its SHA-256 is computed.
//!
//! Platform support is checked before spawning: the builder compiles Go
//! code, so the buildable targets are the Go toolchain targets k6
//! supports.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use super::{BuildInfo, Foundry, FoundryError};
use crate::platform::Platform;
use crate::resolver::ResolvedDependency;

/// Platforms the builder can target.
pub const SUPPORTED_PLATFORMS: &[(&str, &str)] = &[
    ("darwin", "amd64"),
    ("darwin", "arm64"),
    ("linux", "amd64"),
    ("linux", "arm64"),
    ("windows", "amd64"),
];

/// Configuration for [`CommandFoundry`].
#[derive(Debug, Clone)]
pub struct CommandFoundryConfig {
    /// Builder program to invoke.
    pub program: String,
    /// Whether CGO is enabled for builds.
    pub enable_cgo: bool,
    /// Extra environment variables for the builder, e.g. `GOPROXY`.
    pub env: HashMap<String, String>,
    /// Pass the builder's stderr through to this process.
    pub verbose: bool,
}

impl Default for CommandFoundryConfig {
    fn default() -> Self {
        Self {
            program: "k6foundry".to_string(),
            enable_cgo: false,
            env: HashMap::new(),
            verbose: false,
        }
    }
}

/// [`Foundry`] implemented by an external builder program.
#[derive(Debug, Clone)]
pub struct CommandFoundry {
    config: CommandFoundryConfig,
}

impl CommandFoundry {
    /// Creates a foundry invoking the configured builder.
    #[must_use]
    pub fn new(config: CommandFoundryConfig) -> Self {
        Self { config }
    }

    fn supported(platform: &Platform) -> bool {
        SUPPORTED_PLATFORMS
            .iter()
            .any(|(os, arch)| platform.os == *os && platform.arch == *arch)
    }
}

#[async_trait]
impl Foundry for CommandFoundry {
    async fn build(
        &self,
        platform: &Platform,
        dependencies: &[ResolvedDependency],
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<BuildInfo, FoundryError> {
        if !Self::supported(platform) {
            return Err(FoundryError::UnsupportedPlatform {
                platform: platform.to_string(),
            });
        }

        let output = tempfile::NamedTempFile::new()?;
        let output_path = output.path().to_path_buf();

        let mut command = Command::new(&self.config.program);
        command
            .arg("build")
            .arg("--platform")
            .arg(platform.to_string());
        for dep in dependencies {
            command
                .arg("-d")
                .arg(format!("{}={}@v{}", dep.name, dep.module, dep.version));
        }
        command.arg("-o").arg(&output_path);

        command.env(
            "CGO_ENABLED",
            if self.config.enable_cgo { "1" } else { "0" },
        );
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        command.stdin(Stdio::null()).stdout(Stdio::null());
        command.stderr(if self.config.verbose {
            Stdio::inherit()
        } else {
            Stdio::piped()
        });

        debug!(program = %self.config.program, platform = %platform, "invoking builder");

        let result = command.output().await.map_err(|e| FoundryError::Failed {
            message: format!("spawning {}: {e}", self.config.program),
        })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(FoundryError::Failed {
                message: format!(
                    "{} exited with {}: {}",
                    self.config.program,
                    result.status,
                    stderr.trim()
                ),
            });
        }

        // Stream the built binary into the sink, hashing as we go.
        let mut file = tokio::fs::File::open(&output_path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n]).await?;
        }
        out.flush().await?;

        Ok(BuildInfo {
            checksum: hex::encode(hasher.finalize()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved() -> Vec<ResolvedDependency> {
        vec![ResolvedDependency {
            name: "k6".to_string(),
            module: "go.k6.io/k6".to_string(),
            version: semver::Version::new(1, 4, 0),
        }]
    }

    #[tokio::test]
    async fn test_unsupported_platform_rejected_without_spawning() {
        let foundry = CommandFoundry::new(CommandFoundryConfig {
            program: "definitely-not-a-real-builder".to_string(),
            ..Default::default()
        });
        let platform: Platform = "plan9/386".parse().unwrap();

        let err = foundry
            .build(&platform, &resolved(), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FoundryError::UnsupportedPlatform { .. }));
    }

    #[tokio::test]
    async fn test_missing_builder_is_build_failure() {
        let foundry = CommandFoundry::new(CommandFoundryConfig {
            program: "definitely-not-a-real-builder".to_string(),
            ..Default::default()
        });
        let platform: Platform = "linux/amd64".parse().unwrap();

        let err = foundry
            .build(&platform, &resolved(), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FoundryError::Failed { .. }));
        assert!(!err.is_user_error());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_builder_output_streamed_and_hashed() {
        // A shell stand-in for the builder: writes fixed bytes to the
        // path given after -o.
        let script = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            script.path(),
            "#!/bin/sh\nwhile [ \"$1\" != \"-o\" ]; do shift; done\nprintf 'fake binary' > \"$2\"\n",
        )
        .unwrap();
        let mut perms = std::fs::metadata(script.path()).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        std::fs::set_permissions(script.path(), perms).unwrap();
        // Close the write handle before exec'ing it, otherwise the kernel
        // can reject the spawn with ETXTBSY ("text file busy").
        let script = script.into_temp_path();

        let foundry = CommandFoundry::new(CommandFoundryConfig {
            program: script.display().to_string(),
            ..Default::default()
        });
        let platform: Platform = "linux/amd64".parse().unwrap();

        let mut sink = Vec::new();
        let info = foundry
            .build(&platform, &resolved(), &mut sink)
            .await
            .unwrap();

        assert_eq!(sink, b"fake binary");
        assert_eq!(info.checksum, crate::store::checksum(b"fake binary"));
    }
}
