//! Batch scheduler adapters for PBS and Slurm.

use std::env;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, error, trace};
use tokio::process::Command;

use crate::config::{QueueConfig, QueueKind};
use crate::domain::{LaunchRecord, WorkItem};
use crate::error::{AthenaError, Result};
use crate::recovery::OFFLINE_ARTIFACT;

/// File name of the job script written into each launch directory.
pub const SUBMIT_SCRIPT: &str = "submit.sh";

/// Talks to the batch scheduler.
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// Submit a job script, returning the scheduler's job id.
    async fn submit(&self, script: &Path) -> Result<String>;

    /// Number of our jobs currently queued or running.
    async fn active_jobs(&self) -> Result<usize>;
}

/// Adapter that shells out to qsub/qstat or sbatch/squeue.
#[derive(Debug, Clone)]
pub struct CommandQueueAdapter {
    kind: QueueKind,
    submit_exec: String,
    status_exec: String,
    user: String,
}

impl CommandQueueAdapter {
    /// Build an adapter from queue settings
    pub fn from_config(config: &QueueConfig) -> Self {
        let (submit_default, status_default) = match config.q_type {
            QueueKind::Pbs => ("qsub", "qstat"),
            QueueKind::Slurm => ("sbatch", "squeue"),
        };
        Self {
            kind: config.q_type,
            submit_exec: config
                .submit_command
                .clone()
                .unwrap_or_else(|| submit_default.to_string()),
            status_exec: config
                .status_command
                .clone()
                .unwrap_or_else(|| status_default.to_string()),
            user: env::var("USER").or_else(|_| env::var("USERNAME")).unwrap_or_default(),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    async fn run(&self, exec: &str, args: &[&str], cwd: Option<&Path>) -> Result<String> {
        trace!("Running command: {} {:?}", exec, args);
        let mut cmd = Command::new(exec);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| AthenaError::Submission(format!("failed to run {}: {}", exec, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("{} failed with {:?}: {}", exec, output.status.code(), stderr.trim());
            return Err(AthenaError::Submission(format!(
                "{} exited with {:?}: {}",
                exec,
                output.status.code(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl QueueAdapter for CommandQueueAdapter {
    async fn submit(&self, script: &Path) -> Result<String> {
        let script_str = script.to_string_lossy();
        let stdout = self
            .run(&self.submit_exec, &[script_str.as_ref()], script.parent())
            .await?;

        let job_id = parse_job_id(self.kind, &stdout).ok_or_else(|| {
            AthenaError::Submission(format!(
                "could not parse job id from {} output: {}",
                self.submit_exec,
                stdout.trim()
            ))
        })?;
        debug!("Submitted {} as job {}", script.display(), job_id);
        Ok(job_id)
    }

    async fn active_jobs(&self) -> Result<usize> {
        let stdout = match self.kind {
            QueueKind::Slurm => {
                self.run(&self.status_exec, &["-h", "-u", self.user.as_str(), "-o", "%i"], None)
                    .await?
            }
            QueueKind::Pbs => self.run(&self.status_exec, &["-u", self.user.as_str()], None).await?,
        };

        let count = stdout
            .lines()
            .map(str::trim)
            .filter(|line| match self.kind {
                QueueKind::Slurm => !line.is_empty(),
                // qstat prints headers; job rows start with the numeric id
                QueueKind::Pbs => line.starts_with(|c: char| c.is_ascii_digit()),
            })
            .count();
        Ok(count)
    }
}

/// Extract the scheduler job id from submit output.
///
/// sbatch prints `Submitted batch job 123`; qsub prints `123.server`.
pub fn parse_job_id(kind: QueueKind, stdout: &str) -> Option<String> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    match kind {
        QueueKind::Slurm => line
            .strip_prefix("Submitted batch job")
            .map(str::trim)
            .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string),
        QueueKind::Pbs => line.split_whitespace().next().map(str::to_string),
    }
}

/// Single-quote a value for the shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Render the job script for one launch.
///
/// Unless `rocket_launch` replaces it, the body runs the work item's command
/// and reports start and finish through the offline artifact.
pub fn render_script(queue: &QueueConfig, item: &WorkItem, launch: &LaunchRecord) -> String {
    let overrides = &item.queue;
    let job_name = overrides.job_name.as_deref().unwrap_or(&queue.job_name);
    let queue_name = overrides.queue.as_deref().unwrap_or(&queue.queue);
    let walltime = overrides.walltime.as_deref().unwrap_or(&queue.walltime);
    let nnodes = overrides.nnodes.unwrap_or(queue.nnodes);
    let ppnode = overrides.ppnode.unwrap_or(queue.ppnode);
    let logdir = queue.logdir.as_deref().unwrap_or(launch.launch_dir.as_path());

    let mut script = String::from("#!/bin/bash\n");
    script.push_str(&format!("# athena launch {} on {}\n", launch.launch_id, queue.q_name));
    match queue.q_type {
        QueueKind::Pbs => {
            script.push_str(&format!("#PBS -N {}\n", job_name));
            script.push_str(&format!("#PBS -q {}\n", queue_name));
            if !queue.account.is_empty() {
                script.push_str(&format!("#PBS -A {}\n", queue.account));
            }
            script.push_str(&format!("#PBS -l walltime={}\n", walltime));
            if nnodes > 0 {
                if ppnode > 0 {
                    script.push_str(&format!("#PBS -l nodes={}:ppn={}\n", nnodes, ppnode));
                } else {
                    script.push_str(&format!("#PBS -l nodes={}\n", nnodes));
                }
            }
            script.push_str(&format!("#PBS -o {}/\n", logdir.display()));
            script.push_str(&format!("#PBS -e {}/\n", logdir.display()));
        }
        QueueKind::Slurm => {
            script.push_str(&format!("#SBATCH --job-name={}\n", job_name));
            script.push_str(&format!("#SBATCH --partition={}\n", queue_name));
            if !queue.account.is_empty() {
                script.push_str(&format!("#SBATCH --account={}\n", queue.account));
            }
            script.push_str(&format!("#SBATCH --time={}\n", walltime));
            if nnodes > 0 {
                script.push_str(&format!("#SBATCH --nodes={}\n", nnodes));
            }
            if ppnode > 0 {
                script.push_str(&format!("#SBATCH --ntasks-per-node={}\n", ppnode));
            }
            script.push_str(&format!("#SBATCH --output={}/slurm_%j.o\n", logdir.display()));
            script.push_str(&format!("#SBATCH --error={}/slurm_%j.e\n", logdir.display()));
        }
    }

    script.push('\n');
    script.push_str(&format!("cd {}\n", shell_quote(&launch.launch_dir.to_string_lossy())));
    if let Some(pre) = &queue.pre_rocket {
        script.push_str(pre);
        script.push('\n');
    }

    match &queue.rocket_launch {
        Some(launch_cmd) => {
            script.push_str(launch_cmd);
            script.push('\n');
        }
        None => {
            let artifact = OFFLINE_ARTIFACT;
            script.push_str("STARTED=$(date -u +%Y-%m-%dT%H:%M:%SZ)\n");
            script.push_str(&format!(
                "echo \"{{\\\"started_on\\\": \\\"$STARTED\\\"}}\" > {}\n",
                artifact
            ));
            script.push_str(&item.command);
            script.push('\n');
            script.push_str("RC=$?\n");
            script.push_str("STATE=COMPLETED\n");
            script.push_str("[ $RC -ne 0 ] && STATE=FIZZLED\n");
            script.push_str(&format!(
                "echo \"{{\\\"started_on\\\": \\\"$STARTED\\\", \\\"completed_on\\\": \\\"$(date -u +%Y-%m-%dT%H:%M:%SZ)\\\", \\\"state\\\": \\\"$STATE\\\"}}\" > {}\n",
                artifact
            ));
            script.push_str("exit $RC\n");
        }
    }
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QueueOverrides;
    use std::path::PathBuf;

    fn launch() -> LaunchRecord {
        LaunchRecord::new(3, 1, PathBuf::from("/scratch/out/launcher_x_3"))
    }

    #[test]
    fn test_parse_job_id_slurm() {
        assert_eq!(
            parse_job_id(QueueKind::Slurm, "Submitted batch job 123456\n"),
            Some("123456".to_string())
        );
        assert_eq!(parse_job_id(QueueKind::Slurm, "sbatch: error: invalid partition\n"), None);
        assert_eq!(parse_job_id(QueueKind::Slurm, ""), None);
    }

    #[test]
    fn test_parse_job_id_pbs() {
        assert_eq!(
            parse_job_id(QueueKind::Pbs, "\n2101422.titan-batch\n"),
            Some("2101422.titan-batch".to_string())
        );
        assert_eq!(parse_job_id(QueueKind::Pbs, "   \n"), None);
    }

    #[test]
    fn test_render_pbs_script() {
        let queue = QueueConfig {
            account: "stf007".to_string(),
            nnodes: 4,
            ppnode: 2,
            pre_rocket: Some("module load python".to_string()),
            ..QueueConfig::default()
        };
        let item = WorkItem::new("compute_0", "aprun -n 1 task.sh 0");

        let script = render_script(&queue, &item, &launch());
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#PBS -N unnamed_job\n"));
        assert!(script.contains("#PBS -A stf007\n"));
        assert!(script.contains("#PBS -l nodes=4:ppn=2\n"));
        assert!(script.contains("# athena launch 3 on default_queue\n"));
        assert!(script.contains("cd '/scratch/out/launcher_x_3'\n"));
        assert!(script.contains("module load python\n"));
        assert!(script.contains("aprun -n 1 task.sh 0\n"));
        assert!(script.contains(OFFLINE_ARTIFACT));
    }

    #[test]
    fn test_render_slurm_script_with_overrides() {
        let queue = QueueConfig {
            q_type: QueueKind::Slurm,
            ..QueueConfig::default()
        };
        let item = WorkItem::new("service_0", "hostname").with_queue(QueueOverrides {
            queue: Some("killable".to_string()),
            walltime: Some("00:05:00".to_string()),
            job_name: Some("titan_service_job".to_string()),
            ..QueueOverrides::default()
        });

        let script = render_script(&queue, &item, &launch());
        assert!(script.contains("#SBATCH --job-name=titan_service_job\n"));
        assert!(script.contains("#SBATCH --partition=killable\n"));
        assert!(script.contains("#SBATCH --time=00:05:00\n"));
        assert!(!script.contains("--nodes"));
        assert!(!script.contains("#SBATCH --account"));
    }

    #[test]
    fn test_render_quotes_launch_dir() {
        let launch = LaunchRecord::new(4, 1, PathBuf::from("/scratch/my runs/it's_4"));
        let script = render_script(&QueueConfig::default(), &WorkItem::new("t", "true"), &launch);
        assert!(script.contains("cd '/scratch/my runs/it'\\''s_4'\n"));
    }

    #[test]
    fn test_shell_quote_runs_in_sh() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("launch dir");
        std::fs::create_dir(&dir).unwrap();
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("cd {} && pwd", shell_quote(&dir.to_string_lossy())))
            .output()
            .unwrap();
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).trim_end().ends_with("launch dir"));
    }

    #[test]
    fn test_render_uses_rocket_launch_override() {
        let queue = QueueConfig {
            rocket_launch: Some("rlaunch singleshot --offline".to_string()),
            ..QueueConfig::default()
        };
        let item = WorkItem::new("t", "echo never");

        let script = render_script(&queue, &item, &launch());
        assert!(script.contains("rlaunch singleshot --offline\n"));
        assert!(!script.contains("echo never"));
    }

    #[test]
    fn test_from_config_defaults_executables() {
        let adapter = CommandQueueAdapter::from_config(&QueueConfig::default());
        assert_eq!(adapter.kind(), QueueKind::Pbs);
        assert_eq!(adapter.submit_exec, "qsub");
        assert_eq!(adapter.status_exec, "qstat");

        let slurm = CommandQueueAdapter::from_config(&QueueConfig {
            q_type: QueueKind::Slurm,
            submit_command: Some("/opt/fake/sbatch".to_string()),
            ..QueueConfig::default()
        });
        assert_eq!(slurm.submit_exec, "/opt/fake/sbatch");
        assert_eq!(slurm.status_exec, "squeue");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_submit_with_fake_sbatch() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let fake = temp.path().join("sbatch");
        std::fs::write(&fake, "#!/bin/sh\necho \"Submitted batch job 77\"\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        let script = temp.path().join(SUBMIT_SCRIPT);
        std::fs::write(&script, "#!/bin/bash\n").unwrap();

        let adapter = CommandQueueAdapter::from_config(&QueueConfig {
            q_type: QueueKind::Slurm,
            submit_command: Some(fake.to_string_lossy().to_string()),
            ..QueueConfig::default()
        });
        assert_eq!(adapter.submit(&script).await.unwrap(), "77");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_submit_failure_is_submission_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let script = temp.path().join(SUBMIT_SCRIPT);
        std::fs::write(&script, "#!/bin/bash\n").unwrap();

        let adapter = CommandQueueAdapter::from_config(&QueueConfig {
            submit_command: Some("false".to_string()),
            ..QueueConfig::default()
        });
        let err = adapter.submit(&script).await.unwrap_err();
        assert!(matches!(err, AthenaError::Submission(_)));
    }
}
