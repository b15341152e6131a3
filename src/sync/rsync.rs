//! The transfer driver: hook pipeline around a single rsync invocation.
//!
//! Include lists are allow-lists: whenever one is present the exclude list
//! carries the `*` sentinel and the local source path is left out of the
//! command, so rsync ships exactly the named paths. An include list that
//! ends up empty after composition short-circuits the whole operation.

use crate::constants::EXCLUDE_ALL;
use crate::err::Result;
use crate::fsrsync_error;
use crate::sync::command::{run_argv, run_command};
use crate::sync::ssh::run_ssh_command;
use crate::utilities::AsyncLogger;

/// The four hook buckets on each side of the transfer. `checkexit`
/// commands gate the operation; the others are fire-and-forget.
#[derive(Debug, Clone, Default)]
pub struct HookSet {
    pub pre_local: Vec<String>,
    pub pre_local_checkexit: Vec<String>,
    pub pre_remote: Vec<String>,
    pub pre_remote_checkexit: Vec<String>,
    pub post_local: Vec<String>,
    pub post_local_checkexit: Vec<String>,
    pub post_remote: Vec<String>,
    pub post_remote_checkexit: Vec<String>,
}

/// Everything the driver needs to know about one destination.
#[derive(Debug, Clone)]
pub struct RsyncSettings {
    /// `user@host`.
    pub destination: String,
    pub destination_path: String,
    /// Local source directory, canonicalized with a trailing slash.
    pub path: String,
    /// Raw rsync option string from the configuration.
    pub options: String,
    pub ssh_key: Option<String>,
    pub ssh_port: Option<u16>,
    pub hooks: HookSet,
}

pub struct RsyncManager {
    settings: RsyncSettings,
    logger: AsyncLogger,
}

/// Order-preserving dedup.
fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Apply the composition rules: both lists deduped, exclude wins over
/// include, and the `*` sentinel joins the exclude list whenever an
/// include list is present.
pub fn compose_lists(
    exclude: Option<Vec<String>>,
    include: Option<Vec<String>>,
) -> (Option<Vec<String>>, Option<Vec<String>>) {
    let mut exclude = exclude.map(dedupe);
    let include = include.map(|list| {
        let deduped = dedupe(list);
        match &exclude {
            Some(ex) => deduped
                .into_iter()
                .filter(|item| !ex.contains(item))
                .collect(),
            None => deduped,
        }
    });
    if include.is_some() {
        let sentinel = EXCLUDE_ALL.to_string();
        match &mut exclude {
            Some(ex) => {
                if !ex.contains(&sentinel) {
                    ex.push(sentinel);
                }
            }
            None => exclude = Some(vec![sentinel]),
        }
    }
    (exclude, include)
}

/// rsync wants the whole list as one argument value: `{'a','b'}`.
pub fn format_brace_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| format!("'{}'", i)).collect();
    format!("{{{}}}", quoted.join(","))
}

impl RsyncManager {
    pub fn new(settings: RsyncSettings, logger: AsyncLogger) -> Self {
        Self { settings, logger }
    }

    pub fn destination(&self) -> &str {
        &self.settings.destination
    }

    fn remote_user(&self) -> &str {
        self.settings
            .destination
            .split_once('@')
            .map(|(user, _)| user)
            .unwrap_or("root")
    }

    fn remote_host(&self) -> &str {
        self.settings
            .destination
            .split_once('@')
            .map(|(_, host)| host)
            .unwrap_or(self.settings.destination.as_str())
    }

    /// One `-e` value covering whatever of key and port is configured.
    fn ssh_transport_args(&self) -> Vec<String> {
        let remote_shell = match (&self.settings.ssh_key, self.settings.ssh_port) {
            (Some(key), Some(port)) => Some(format!("ssh -i {} -p {}", key, port)),
            (Some(key), None) => Some(format!("ssh -i {}", key)),
            (None, Some(port)) => Some(format!("ssh -p {}", port)),
            (None, None) => None,
        };
        match remote_shell {
            Some(shell) => vec!["-e".to_string(), shell],
            None => Vec::new(),
        }
    }

    /// Full argv (without the leading `rsync`).
    pub fn build_rsync_args(
        &self,
        exclude: &Option<Vec<String>>,
        include: &Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        let mut args = shell_words::split(&self.settings.options).map_err(|e| {
            crate::fsrsync_error_with_source!(
                Transfer,
                e,
                "Unparsable rsync options: {}",
                self.settings.options
            )
        })?;
        args.push("--stats".to_string());
        args.extend(self.ssh_transport_args());
        if let Some(ex) = exclude {
            if !ex.is_empty() {
                args.push(format!("--exclude={}", format_brace_list(ex)));
            }
        }
        if let Some(inc) = include {
            if inc.is_empty() {
                return Err(fsrsync_error!(Transfer, "Refusing to build an empty include list").into());
            }
            args.push(format!("--include={}", format_brace_list(inc)));
        } else {
            // Without an include list the whole source tree is on the table.
            args.push(self.settings.path.clone());
        }
        args.push(format!(
            "{}:{}",
            self.settings.destination, self.settings.destination_path
        ));
        Ok(args)
    }

    async fn run_fire_and_forget_local(&self, commands: &[String]) {
        for command in commands {
            if command.is_empty() {
                continue;
            }
            match run_command(command, &self.logger).await {
                Ok(out) => self.logger.info(format!(
                    "Pre/post command '{}': exit {:?}, stdout: {}",
                    command,
                    out.exit_code,
                    out.stdout.trim_end()
                )),
                Err(e) => self
                    .logger
                    .error(format!("Pre/post command '{}' failed to run: {}", command, e)),
            }
        }
    }

    async fn run_checkexit_local(&self, commands: &[String]) -> bool {
        for command in commands {
            if command.is_empty() {
                continue;
            }
            match run_command(command, &self.logger).await {
                Ok(out) if out.success() => {}
                Ok(out) => {
                    self.logger.error(format!(
                        "Checkexit command '{}' failed with exit code {:?}: {} {}",
                        command, out.exit_code, out.stdout, out.stderr
                    ));
                    return false;
                }
                Err(e) => {
                    self.logger
                        .error(format!("Checkexit command '{}' failed to run: {}", command, e));
                    return false;
                }
            }
        }
        true
    }

    async fn run_fire_and_forget_remote(&self, commands: &[String]) {
        for command in commands {
            if command.is_empty() {
                continue;
            }
            if let Err(e) = run_ssh_command(
                command,
                self.remote_host(),
                self.remote_user(),
                self.settings.ssh_key.as_deref(),
                self.settings.ssh_port.unwrap_or(crate::constants::DEFAULT_SSH_PORT),
                &self.logger,
            )
            .await
            {
                self.logger
                    .error(format!("Remote command '{}' failed to run: {}", command, e));
            }
        }
    }

    async fn run_checkexit_remote(&self, commands: &[String]) -> bool {
        for command in commands {
            if command.is_empty() {
                continue;
            }
            match run_ssh_command(
                command,
                self.remote_host(),
                self.remote_user(),
                self.settings.ssh_key.as_deref(),
                self.settings.ssh_port.unwrap_or(crate::constants::DEFAULT_SSH_PORT),
                &self.logger,
            )
            .await
            {
                Ok(out) if out.success() => {}
                Ok(out) => {
                    self.logger.error(format!(
                        "Remote checkexit command '{}' failed with exit code {:?}: {} {}",
                        command, out.exit_code, out.stdout, out.stderr
                    ));
                    return false;
                }
                Err(e) => {
                    self.logger.error(format!(
                        "Remote checkexit command '{}' failed to run: {}",
                        command, e
                    ));
                    return false;
                }
            }
        }
        true
    }

    /// Run the transfer. Returns `(rsync_ok, hooks_ok)`: `rsync_ok` is
    /// whether the rsync subprocess exited 0, `hooks_ok` whether no
    /// checkexit hook failed. A failing pre-checkexit aborts before rsync;
    /// a failing post-checkexit leaves the rsync result standing.
    pub async fn run(
        &self,
        exclude_list: Option<Vec<String>>,
        include_list: Option<Vec<String>>,
    ) -> (bool, bool) {
        let (exclude, include) = compose_lists(exclude_list, include_list);

        if let Some(inc) = &include {
            if inc.is_empty() {
                self.logger
                    .debug("Include list is empty, skipping rsync.".to_string());
                return (true, true);
            }
        }

        self.run_fire_and_forget_local(&self.settings.hooks.pre_local)
            .await;
        if !self
            .run_checkexit_local(&self.settings.hooks.pre_local_checkexit)
            .await
        {
            return (false, false);
        }
        self.run_fire_and_forget_remote(&self.settings.hooks.pre_remote)
            .await;
        if !self
            .run_checkexit_remote(&self.settings.hooks.pre_remote_checkexit)
            .await
        {
            return (false, false);
        }

        let rsync_ok = match self.build_rsync_args(&exclude, &include) {
            Ok(args) => {
                self.logger.info(format!(
                    "Running rsync for {}: rsync {}",
                    self.settings.destination,
                    args.join(" ")
                ));
                match run_argv("rsync", &args, &self.logger).await {
                    Ok(out) => {
                        self.logger.info(format!(
                            "Rsync return code: {:?}, stdout: {}, stderr: {}",
                            out.exit_code,
                            out.stdout.trim_end(),
                            out.stderr.trim_end()
                        ));
                        out.success()
                    }
                    Err(e) => {
                        self.logger.error(format!(
                            "Rsync failed to run for {}: {}",
                            self.settings.destination, e
                        ));
                        false
                    }
                }
            }
            Err(e) => {
                self.logger
                    .error(format!("Could not build rsync command: {}", e));
                false
            }
        };

        self.run_fire_and_forget_local(&self.settings.hooks.post_local)
            .await;
        if !self
            .run_checkexit_local(&self.settings.hooks.post_local_checkexit)
            .await
        {
            return (rsync_ok, false);
        }
        self.run_fire_and_forget_remote(&self.settings.hooks.post_remote)
            .await;
        if !self
            .run_checkexit_remote(&self.settings.hooks.post_remote_checkexit)
            .await
        {
            return (rsync_ok, false);
        }

        (rsync_ok, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RsyncSettings {
        RsyncSettings {
            destination: "root@backup01".to_string(),
            destination_path: "/srv/backup/".to_string(),
            path: "/srv/data/".to_string(),
            options: "-az --delete".to_string(),
            ssh_key: None,
            ssh_port: Some(22),
            hooks: HookSet::default(),
        }
    }

    fn manager(settings: RsyncSettings) -> RsyncManager {
        RsyncManager::new(settings, AsyncLogger::disabled())
    }

    #[test]
    fn exclude_wins_over_include() {
        let (exclude, include) = compose_lists(
            Some(vec!["/srv/data/locked".to_string(), "*".to_string()]),
            Some(vec![
                "/srv/data/a".to_string(),
                "/srv/data/locked".to_string(),
            ]),
        );
        let include = include.unwrap();
        assert_eq!(include, vec!["/srv/data/a".to_string()]);
        let exclude = exclude.unwrap();
        assert!(exclude.contains(&"/srv/data/locked".to_string()));
        // No overlap survives composition.
        assert!(include.iter().all(|i| !exclude.contains(i)));
    }

    #[test]
    fn sentinel_joins_exclude_only_with_include() {
        let (exclude, _) = compose_lists(None, Some(vec!["/srv/data/a".to_string()]));
        assert_eq!(exclude.unwrap(), vec!["*".to_string()]);

        let (exclude, include) = compose_lists(Some(vec!["/srv/data/x".to_string()]), None);
        assert!(include.is_none());
        assert_eq!(exclude.unwrap(), vec!["/srv/data/x".to_string()]);
    }

    #[test]
    fn duplicate_entries_collapse() {
        let (_, include) = compose_lists(
            None,
            Some(vec![
                "/srv/data/a".to_string(),
                "/srv/data/a".to_string(),
                "/srv/data/b".to_string(),
            ]),
        );
        assert_eq!(
            include.unwrap(),
            vec!["/srv/data/a".to_string(), "/srv/data/b".to_string()]
        );
    }

    #[test]
    fn brace_list_formatting() {
        assert_eq!(format_brace_list(&["a".to_string()]), "{'a'}");
        assert_eq!(
            format_brace_list(&["a".to_string(), "b".to_string()]),
            "{'a','b'}"
        );
    }

    #[test]
    fn full_tree_command_includes_source_path() {
        let m = manager(settings());
        let args = m.build_rsync_args(&None, &None).unwrap();
        assert_eq!(
            args,
            vec![
                "-az",
                "--delete",
                "--stats",
                "-e",
                "ssh -p 22",
                "/srv/data/",
                "root@backup01:/srv/backup/"
            ]
        );
    }

    #[test]
    fn include_command_omits_source_path() {
        let m = manager(settings());
        let (exclude, include) = compose_lists(
            Some(vec!["*".to_string()]),
            Some(vec!["/srv/data/a".to_string(), "/srv/data/b".to_string()]),
        );
        let args = m.build_rsync_args(&exclude, &include).unwrap();
        assert!(args.contains(&"--exclude={'*'}".to_string()));
        assert!(args.contains(&"--include={'/srv/data/a','/srv/data/b'}".to_string()));
        assert!(!args.contains(&"/srv/data/".to_string()));
        assert_eq!(args.last().unwrap(), "root@backup01:/srv/backup/");
    }

    #[test]
    fn ssh_flag_synthesis_emits_a_single_e() {
        let mut s = settings();
        s.ssh_key = Some("/root/.ssh/id_rsa".to_string());
        s.ssh_port = Some(2222);
        let args = manager(s).build_rsync_args(&None, &None).unwrap();
        let e_count = args.iter().filter(|a| a.as_str() == "-e").count();
        assert_eq!(e_count, 1);
        assert!(args.contains(&"ssh -i /root/.ssh/id_rsa -p 2222".to_string()));

        let mut s = settings();
        s.ssh_key = Some("/root/.ssh/id_rsa".to_string());
        s.ssh_port = None;
        let args = manager(s).build_rsync_args(&None, &None).unwrap();
        assert!(args.contains(&"ssh -i /root/.ssh/id_rsa".to_string()));

        let mut s = settings();
        s.ssh_key = None;
        s.ssh_port = None;
        let args = manager(s).build_rsync_args(&None, &None).unwrap();
        assert!(!args.contains(&"-e".to_string()));
    }

    #[tokio::test]
    async fn empty_include_short_circuits_before_hooks() {
        let mut s = settings();
        // Would fail the run if the hook pipeline were reached.
        s.hooks.pre_local_checkexit = vec!["false".to_string()];
        let m = manager(s);
        let (rsync_ok, hooks_ok) = m.run(None, Some(vec![])).await;
        assert!(rsync_ok);
        assert!(hooks_ok);
    }

    #[tokio::test]
    async fn everything_excluded_short_circuits_too() {
        let m = manager(settings());
        let (rsync_ok, hooks_ok) = m
            .run(
                Some(vec!["/srv/data/a".to_string()]),
                Some(vec!["/srv/data/a".to_string()]),
            )
            .await;
        assert!(rsync_ok);
        assert!(hooks_ok);
    }

    #[tokio::test]
    async fn failing_pre_checkexit_aborts_before_rsync() {
        let mut s = settings();
        s.hooks.pre_local_checkexit = vec!["false".to_string()];
        let m = manager(s);
        let (rsync_ok, hooks_ok) = m.run(None, Some(vec!["/srv/data/a".to_string()])).await;
        assert!(!rsync_ok);
        assert!(!hooks_ok);
    }

    #[tokio::test]
    async fn first_failing_checkexit_aborts_the_chain() {
        let mut s = settings();
        s.hooks.pre_local_checkexit = vec!["true".to_string(), "false".to_string()];
        // Empty strings are skipped, not executed.
        s.hooks.pre_local = vec!["".to_string(), "true".to_string()];
        let m = manager(s);
        let (rsync_ok, hooks_ok) = m.run(None, Some(vec!["/srv/data/a".to_string()])).await;
        assert!(!rsync_ok);
        assert!(!hooks_ok);
    }
}
