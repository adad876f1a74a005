//! OCI runtime spec generation.
//!
//! Turns an image configuration plus caller options (rootless, host
//! networking, PRoot emulation, seccomp) into the `config.json` of a
//! bundle. The builder accumulates state; [`SpecBuilder::build`]
//! resolves the user against the bundle rootfs and produces the final
//! spec.

use std::path::{Path, PathBuf};

use nix::unistd::{getegid, geteuid};
use oci_spec::runtime::{
    Capability, LinuxIdMappingBuilder, LinuxNamespace, LinuxNamespaceBuilder,
    LinuxNamespaceType, LinuxSeccomp, Mount, MountBuilder, Process, Root, Spec,
};
use skiff_core::error::{Result, SkiffError};
use skiff_core::idmap::{UserIds, UserSpec};

use crate::oci::ImageConfig;

use super::seccomp;

/// Annotation keys carried over from the image configuration.
const ANNOTATION_AUTHOR: &str = "org.opencontainers.image.author";
const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";
const ANNOTATION_STOP_SIGNAL: &str = "org.opencontainers.image.stopSignal";
const ANNOTATION_EXPOSED_PORTS: &str = "org.opencontainers.image.exposedPorts";

/// Where the PRoot binary is bound inside the container.
const PROOT_PATH: &str = "/dev/proot/proot";
const PROOT_DIR: &str = "/dev/proot";

#[derive(Debug, Clone, Default)]
struct ProotOptions {
    path: PathBuf,
    ports: Vec<String>,
}

/// Builds an OCI runtime spec.
#[derive(Debug, Clone)]
pub struct SpecBuilder {
    spec: Spec,
    entrypoint: Option<Vec<String>>,
    cmd: Option<Vec<String>>,
    user: UserSpec,
    custom_seccomp: bool,
    proot: Option<ProotOptions>,
    rootless: bool,
}

impl SpecBuilder {
    /// Start from the default spec with the default capability set.
    pub fn new() -> Self {
        let mut builder = Self {
            spec: Spec::default(),
            entrypoint: None,
            cmd: None,
            user: UserSpec::parse(UserSpec::ROOT),
            custom_seccomp: false,
            proot: None,
            rootless: false,
        };
        builder.set_capabilities(seccomp::default_capabilities());
        builder
    }

    /// Continue from an existing spec (e.g. a bundle being updated).
    pub fn from_spec(spec: Spec) -> Self {
        let user = spec
            .process()
            .as_ref()
            .map(|p| UserSpec::parse(&format!("{}:{}", p.user().uid(), p.user().gid())))
            .unwrap_or_else(|| UserSpec::parse(UserSpec::ROOT));
        Self {
            spec,
            entrypoint: None,
            cmd: None,
            user,
            custom_seccomp: false,
            proot: None,
            rootless: false,
        }
    }

    /// Transform the spec for unprivileged execution: user namespace,
    /// no cgroup configuration, mounts usable without privileges, and
    /// a reduced capability set. Uid/gid mappings are written by
    /// [`Self::build`] once the user is known.
    pub fn to_rootless(&mut self) {
        let mut linux = self.spec.linux().clone().unwrap_or_default();

        let mut namespaces: Vec<LinuxNamespace> =
            linux.namespaces().clone().unwrap_or_default();
        namespaces.retain(|ns| ns.typ() != LinuxNamespaceType::Cgroup);
        if !namespaces
            .iter()
            .any(|ns| ns.typ() == LinuxNamespaceType::User)
        {
            if let Ok(ns) = LinuxNamespaceBuilder::default()
                .typ(LinuxNamespaceType::User)
                .build()
            {
                namespaces.push(ns);
            }
        }
        linux.set_namespaces(Some(namespaces));
        linux.set_cgroups_path(None);
        linux.set_resources(None);
        self.spec.set_linux(Some(linux));

        let mounts = self
            .spec
            .mounts()
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter_map(rootless_mount)
            .collect();
        self.spec.set_mounts(Some(mounts));

        let mut caps = seccomp::default_capabilities();
        caps.remove(&Capability::Mknod);
        caps.remove(&Capability::AuditWrite);
        caps.remove(&Capability::NetRaw);
        self.set_capabilities(caps);

        self.rootless = true;
    }

    /// Share the host's network: no network namespace, the host's
    /// hostname, and its name resolution files bound read-only.
    pub fn use_host_network(&mut self) {
        let mut linux = self.spec.linux().clone().unwrap_or_default();
        let mut namespaces: Vec<LinuxNamespace> =
            linux.namespaces().clone().unwrap_or_default();
        namespaces.retain(|ns| ns.typ() != LinuxNamespaceType::Network);
        linux.set_namespaces(Some(namespaces));
        self.spec.set_linux(Some(linux));

        self.spec.set_hostname(None);

        let options = ["bind", "mode=0444", "nosuid", "noexec", "nodev", "ro"];
        for file in ["/etc/hosts", "/etc/resolv.conf"] {
            self.add_bind_mount(file, file, &options);
        }
    }

    pub fn set_process_user(&mut self, user: UserSpec) {
        self.user = user;
    }

    pub fn set_process_entrypoint(&mut self, entrypoint: Vec<String>) {
        self.entrypoint = Some(entrypoint);
        self.cmd = None;
    }

    pub fn set_process_cmd(&mut self, cmd: Vec<String>) {
        self.cmd = Some(cmd);
    }

    pub fn set_process_cwd(&mut self, cwd: &str) {
        let mut process = self.process();
        process.set_cwd(PathBuf::from(cwd));
        self.spec.set_process(Some(process));
    }

    pub fn set_terminal(&mut self, terminal: bool) {
        let mut process = self.process();
        process.set_terminal(Some(terminal));
        self.spec.set_process(Some(process));
    }

    /// Set or replace one process environment variable.
    pub fn add_process_env(&mut self, key: &str, value: &str) {
        let mut process = self.process();
        let mut env = process.env().clone().unwrap_or_default();
        let prefix = format!("{key}=");
        if let Some(existing) = env.iter_mut().find(|e| e.starts_with(&prefix)) {
            *existing = format!("{key}={value}");
        } else {
            env.push(format!("{key}={value}"));
        }
        process.set_env(Some(env));
        self.spec.set_process(Some(process));
    }

    pub fn add_annotation(&mut self, key: &str, value: &str) {
        let mut annotations = self.spec.annotations().clone().unwrap_or_default();
        annotations.insert(key.to_string(), value.to_string());
        self.spec.set_annotations(Some(annotations));
    }

    /// Merge ports into the exposed-ports annotation (deduplicated,
    /// sorted, comma-separated).
    pub fn add_exposed_ports(&mut self, ports: &[String]) {
        let mut exposed: std::collections::BTreeSet<String> = self
            .spec
            .annotations()
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_EXPOSED_PORTS))
            .map(|csv| {
                csv.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        for port in ports {
            exposed.insert(port.trim().to_string());
        }
        if !exposed.is_empty() {
            let csv = exposed.into_iter().collect::<Vec<_>>().join(",");
            self.add_annotation(ANNOTATION_EXPOSED_PORTS, &csv);
        }
    }

    /// Enable PRoot user-id emulation with the given host binary.
    pub fn set_proot_path(&mut self, proot_path: &Path) {
        let ports = self.proot.take().map(|p| p.ports).unwrap_or_default();
        self.proot = Some(ProotOptions {
            path: proot_path.to_path_buf(),
            ports,
        });

        self.add_tmpfs_mount(PROOT_DIR, &["exec", "mode=755", "size=32256k"]);
        self.add_bind_mount(
            &proot_path.to_string_lossy(),
            PROOT_PATH,
            &["bind", "ro"],
        );
        self.add_process_env("PROOT_TMP_DIR", PROOT_DIR);
        self.add_process_env("PROOT_NO_SECCOMP", "1");
        self.add_capability(Capability::SysPtrace);
    }

    /// Publish a port through PRoot (`-p published:target`).
    pub fn add_proot_port_mapping(&mut self, published: &str, target: &str) {
        self.proot
            .get_or_insert_with(ProotOptions::default)
            .ports
            .push(format!("{published}:{target}"));
    }

    /// Use an explicit seccomp profile instead of the derived default.
    pub fn set_seccomp_profile(&mut self, profile: LinuxSeccomp) {
        let mut linux = self.spec.linux().clone().unwrap_or_default();
        linux.set_seccomp(Some(profile));
        self.spec.set_linux(Some(linux));
        self.custom_seccomp = true;
    }

    /// Allow every syscall: default-allow with no rules.
    pub fn set_seccomp_unconfined(&mut self) {
        self.set_seccomp_profile(seccomp::unconfined_profile());
    }

    /// Copy the runtime-relevant parts of an image configuration.
    ///
    /// See the image-spec conversion rules: user, entrypoint/cmd, env
    /// and working directory feed the process; labels, author, created,
    /// stop signal and exposed ports become annotations.
    pub fn apply_image(&mut self, config: &ImageConfig) {
        if let Some(user) = &config.config.user {
            self.user = UserSpec::parse(user);
        }

        self.entrypoint = config.config.entrypoint.clone();
        self.cmd = config.config.cmd.clone();

        for (key, value) in config.config.env_pairs() {
            self.add_process_env(key, value);
        }

        if let Some(working_dir) = &config.config.working_dir {
            if !working_dir.is_empty() {
                self.set_process_cwd(working_dir);
            }
        }

        for (key, value) in &config.config.labels {
            self.add_annotation(key, value);
        }
        if let Some(author) = &config.author {
            self.add_annotation(ANNOTATION_AUTHOR, author);
        }
        if let Some(created) = &config.created {
            self.add_annotation(ANNOTATION_CREATED, created);
        }
        if let Some(signal) = &config.config.stop_signal {
            self.add_annotation(ANNOTATION_STOP_SIGNAL, signal);
        }
        if !config.config.exposed_ports.is_empty() {
            let ports: Vec<String> = config.config.exposed_ports.keys().cloned().collect();
            self.add_exposed_ports(&ports);
        }
    }

    /// Produce the final spec, resolving the user against the bundle's
    /// `rootfs/etc/passwd` and `etc/group`.
    pub fn build(&mut self, rootfs: &Path) -> Result<Spec> {
        let ids = self.user.resolve(rootfs)?;

        // PRoot maps the requested user itself; the native process
        // stays at 0:0 inside the user namespace.
        let process_ids = if self.proot.is_some() {
            UserIds::default()
        } else if self.rootless && !ids.is_root() {
            return Err(SkiffError::PermissionDenied(format!(
                "rootless container: only user 0:0 supported but {} provided. \
                 hint: enable proot as a workaround",
                self.user
            )));
        } else {
            ids
        };

        self.apply_entrypoint(ids);

        let mut process = self.process();
        let mut user = process.user().clone();
        user.set_uid(process_ids.uid);
        user.set_gid(process_ids.gid);
        process.set_user(user);
        self.spec.set_process(Some(process));

        if self.rootless {
            let mut linux = self.spec.linux().clone().unwrap_or_default();
            let uid_mapping = LinuxIdMappingBuilder::default()
                .host_id(geteuid().as_raw())
                .container_id(process_ids.uid)
                .size(1u32)
                .build()
                .map_err(|e| SkiffError::Other(format!("uid mapping: {e}")))?;
            let gid_mapping = LinuxIdMappingBuilder::default()
                .host_id(getegid().as_raw())
                .container_id(process_ids.gid)
                .size(1u32)
                .build()
                .map_err(|e| SkiffError::Other(format!("gid mapping: {e}")))?;
            linux.set_uid_mappings(Some(vec![uid_mapping]));
            linux.set_gid_mappings(Some(vec![gid_mapping]));
            self.spec.set_linux(Some(linux));
        }

        if !self.custom_seccomp {
            let profile = seccomp::default_profile(&self.spec)?;
            let mut linux = self.spec.linux().clone().unwrap_or_default();
            linux.set_seccomp(Some(profile));
            self.spec.set_linux(Some(linux));
        }

        let mut root = Root::default();
        root.set_path(PathBuf::from("rootfs"));
        root.set_readonly(Some(false));
        self.spec.set_root(Some(root));

        Ok(self.spec.clone())
    }

    /// Combine entrypoint and cmd into process args, prefixing the
    /// PRoot launcher when enabled.
    fn apply_entrypoint(&mut self, ids: UserIds) {
        let mut args: Vec<String> = Vec::new();
        if let Some(proot) = &self.proot {
            args.push(PROOT_PATH.to_string());
            args.push("--kill-on-exit".to_string());
            args.push("-n".to_string());
            if ids.is_root() {
                args.push("-0".to_string());
            } else {
                args.push("-i".to_string());
                args.push(ids.to_string());
            }
            for port in &proot.ports {
                args.push("-p".to_string());
                args.push(port.clone());
            }
        }
        if let Some(entrypoint) = &self.entrypoint {
            args.extend(entrypoint.iter().cloned());
        }
        if let Some(cmd) = &self.cmd {
            args.extend(cmd.iter().cloned());
        }

        let mut process = self.process();
        process.set_args(Some(args));
        self.spec.set_process(Some(process));
    }

    fn process(&self) -> Process {
        self.spec.process().clone().unwrap_or_default()
    }

    fn set_capabilities(&mut self, caps: oci_spec::runtime::Capabilities) {
        let mut process = self.process();
        let capabilities = seccomp::capability_sets(caps);
        process.set_capabilities(Some(capabilities));
        self.spec.set_process(Some(process));
    }

    fn add_capability(&mut self, cap: Capability) {
        let mut process = self.process();
        let current = process
            .capabilities()
            .as_ref()
            .and_then(|c| c.bounding().clone())
            .unwrap_or_default();
        let mut caps = current;
        caps.insert(cap);
        process.set_capabilities(Some(seccomp::capability_sets(caps)));
        self.spec.set_process(Some(process));
    }

    fn add_bind_mount(&mut self, source: &str, destination: &str, options: &[&str]) {
        if let Ok(mount) = MountBuilder::default()
            .destination(destination)
            .typ("bind")
            .source(source)
            .options(
                options
                    .iter()
                    .map(|o| o.to_string())
                    .collect::<Vec<String>>(),
            )
            .build()
        {
            self.push_mount(mount);
        }
    }

    fn add_tmpfs_mount(&mut self, destination: &str, options: &[&str]) {
        if let Ok(mount) = MountBuilder::default()
            .destination(destination)
            .typ("tmpfs")
            .source("tmpfs")
            .options(
                options
                    .iter()
                    .map(|o| o.to_string())
                    .collect::<Vec<String>>(),
            )
            .build()
        {
            self.push_mount(mount);
        }
    }

    fn push_mount(&mut self, mount: Mount) {
        let mut mounts = self.spec.mounts().clone().unwrap_or_default();
        mounts.push(mount);
        self.spec.set_mounts(Some(mounts));
    }
}

impl Default for SpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrite one default mount for a single-uid user namespace:
/// sysfs cannot be mounted, so `/sys` becomes a read-only bind of the
/// host's; `uid=`/`gid=` options reference ids that are not mapped;
/// cgroup mounts are dropped entirely.
fn rootless_mount(mount: Mount) -> Option<Mount> {
    if mount.typ().as_deref() == Some("cgroup") {
        return None;
    }
    if mount.destination() == Path::new("/sys")
        && mount.typ().as_deref() == Some("sysfs")
    {
        return MountBuilder::default()
            .destination("/sys")
            .typ("bind")
            .source("/sys")
            .options(
                ["rbind", "nosuid", "noexec", "nodev", "ro"]
                    .iter()
                    .map(|o| o.to_string())
                    .collect::<Vec<String>>(),
            )
            .build()
            .ok();
    }
    if let Some(options) = mount.options() {
        let filtered: Vec<String> = options
            .iter()
            .filter(|o| !o.starts_with("uid=") && !o.starts_with("gid="))
            .cloned()
            .collect();
        if filtered.len() != options.len() {
            let mut mount = mount;
            mount.set_options(Some(filtered));
            return Some(mount);
        }
    }
    Some(mount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::EmptyObject;
    use tempfile::TempDir;

    fn image_config() -> ImageConfig {
        let mut config = ImageConfig::new();
        config.author = Some("tester".to_string());
        config.config.entrypoint = Some(vec!["/bin/app".to_string()]);
        config.config.cmd = Some(vec!["--serve".to_string()]);
        config.config.set_env("APP_MODE", "prod");
        config.config.working_dir = Some("/srv".to_string());
        config
            .config
            .labels
            .insert("team".to_string(), "infra".to_string());
        config.config.stop_signal = Some("SIGQUIT".to_string());
        config
            .config
            .exposed_ports
            .insert("8080/tcp".to_string(), EmptyObject {});
        config
    }

    fn empty_rootfs() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn test_apply_image_maps_process_and_annotations() {
        let mut builder = SpecBuilder::new();
        builder.apply_image(&image_config());
        let spec = builder.build(empty_rootfs().path()).unwrap();

        let process = spec.process().as_ref().unwrap();
        assert_eq!(
            process.args().as_ref().unwrap(),
            &vec!["/bin/app".to_string(), "--serve".to_string()]
        );
        assert!(process
            .env()
            .as_ref()
            .unwrap()
            .contains(&"APP_MODE=prod".to_string()));
        assert_eq!(process.cwd(), &PathBuf::from("/srv"));

        let annotations = spec.annotations().as_ref().unwrap();
        assert_eq!(annotations.get("team").map(String::as_str), Some("infra"));
        assert_eq!(
            annotations.get(ANNOTATION_STOP_SIGNAL).map(String::as_str),
            Some("SIGQUIT")
        );
        assert_eq!(
            annotations.get(ANNOTATION_EXPOSED_PORTS).map(String::as_str),
            Some("8080/tcp")
        );
    }

    #[test]
    fn test_exposed_ports_merge_sorted_dedup() {
        let mut builder = SpecBuilder::new();
        builder.add_exposed_ports(&["9090/tcp".to_string(), "80/tcp".to_string()]);
        builder.add_exposed_ports(&["80/tcp".to_string(), "53/udp".to_string()]);
        let spec = builder.build(empty_rootfs().path()).unwrap();
        assert_eq!(
            spec.annotations()
                .as_ref()
                .unwrap()
                .get(ANNOTATION_EXPOSED_PORTS)
                .map(String::as_str),
            Some("53/udp,80/tcp,9090/tcp")
        );
    }

    #[test]
    fn test_host_network_removes_namespace_and_binds_resolv() {
        let mut builder = SpecBuilder::new();
        builder.use_host_network();
        let spec = builder.build(empty_rootfs().path()).unwrap();

        assert!(spec.hostname().is_none());
        let namespaces = spec.linux().as_ref().unwrap().namespaces().as_ref().unwrap();
        assert!(!namespaces
            .iter()
            .any(|ns| ns.typ() == LinuxNamespaceType::Network));

        let mounts = spec.mounts().as_ref().unwrap();
        for file in ["/etc/hosts", "/etc/resolv.conf"] {
            let mount = mounts
                .iter()
                .find(|m| m.destination() == Path::new(file))
                .unwrap();
            assert_eq!(mount.typ().as_deref(), Some("bind"));
            assert!(mount.options().as_ref().unwrap().contains(&"ro".to_string()));
        }
    }

    #[test]
    fn test_rootless_adds_user_namespace_and_mappings() {
        let mut builder = SpecBuilder::new();
        builder.to_rootless();
        let spec = builder.build(empty_rootfs().path()).unwrap();

        let linux = spec.linux().as_ref().unwrap();
        assert!(linux
            .namespaces()
            .as_ref()
            .unwrap()
            .iter()
            .any(|ns| ns.typ() == LinuxNamespaceType::User));

        let uid_mappings = linux.uid_mappings().as_ref().unwrap();
        assert_eq!(uid_mappings.len(), 1);
        assert_eq!(uid_mappings[0].host_id(), geteuid().as_raw());
        assert_eq!(uid_mappings[0].container_id(), 0);
        assert_eq!(uid_mappings[0].size(), 1);

        // No cgroup namespace, no sysfs mount.
        assert!(!linux
            .namespaces()
            .as_ref()
            .unwrap()
            .iter()
            .any(|ns| ns.typ() == LinuxNamespaceType::Cgroup));
        assert!(!spec
            .mounts()
            .as_ref()
            .unwrap()
            .iter()
            .any(|m| m.typ().as_deref() == Some("sysfs")));
    }

    #[test]
    fn test_rootless_nonzero_user_is_rejected() {
        let mut builder = SpecBuilder::new();
        builder.to_rootless();
        builder.set_process_user(UserSpec::parse("1000:1000"));
        let err = builder.build(empty_rootfs().path()).unwrap_err();
        assert!(matches!(err, SkiffError::PermissionDenied(_)));
    }

    #[test]
    fn test_rootless_root_user_is_allowed() {
        let mut builder = SpecBuilder::new();
        builder.to_rootless();
        builder.set_process_user(UserSpec::parse("root:root"));
        // "root" resolves through etc/passwd.
        let rootfs = empty_rootfs();
        std::fs::create_dir_all(rootfs.path().join("etc")).unwrap();
        std::fs::write(rootfs.path().join("etc/passwd"), "root:x:0:0::/:/bin/sh\n").unwrap();
        std::fs::write(rootfs.path().join("etc/group"), "root:x:0:\n").unwrap();

        let spec = builder.build(rootfs.path()).unwrap();
        let user = spec.process().as_ref().unwrap().user().clone();
        assert_eq!(user.uid(), 0);
        assert_eq!(user.gid(), 0);
    }

    #[test]
    fn test_proot_prefixes_argv_and_mounts_binary() {
        let mut builder = SpecBuilder::new();
        builder.to_rootless();
        builder.set_proot_path(Path::new("/usr/bin/proot"));
        builder.set_process_user(UserSpec::parse("1000:1000"));
        builder.add_proot_port_mapping("8080", "80");
        builder.set_process_entrypoint(vec!["/bin/app".to_string()]);
        let spec = builder.build(empty_rootfs().path()).unwrap();

        let process = spec.process().as_ref().unwrap();
        assert_eq!(
            process.args().as_ref().unwrap(),
            &vec![
                "/dev/proot/proot".to_string(),
                "--kill-on-exit".to_string(),
                "-n".to_string(),
                "-i".to_string(),
                "1000:1000".to_string(),
                "-p".to_string(),
                "8080:80".to_string(),
                "/bin/app".to_string(),
            ]
        );
        // Native process stays root inside the namespace.
        assert_eq!(process.user().uid(), 0);
        assert!(process
            .env()
            .as_ref()
            .unwrap()
            .contains(&"PROOT_TMP_DIR=/dev/proot".to_string()));

        let mounts = spec.mounts().as_ref().unwrap();
        assert!(mounts
            .iter()
            .any(|m| m.destination() == Path::new("/dev/proot")
                && m.typ().as_deref() == Some("tmpfs")));
        assert!(mounts
            .iter()
            .any(|m| m.destination() == Path::new("/dev/proot/proot")));

        let caps = process.capabilities().as_ref().unwrap();
        assert!(caps
            .bounding()
            .as_ref()
            .unwrap()
            .contains(&Capability::SysPtrace));
    }

    #[test]
    fn test_proot_root_user_uses_zero_flag() {
        let mut builder = SpecBuilder::new();
        builder.to_rootless();
        builder.set_proot_path(Path::new("/usr/bin/proot"));
        builder.set_process_entrypoint(vec!["/bin/sh".to_string()]);
        let spec = builder.build(empty_rootfs().path()).unwrap();

        let args = spec.process().as_ref().unwrap().args().clone().unwrap();
        assert_eq!(
            args,
            vec![
                "/dev/proot/proot".to_string(),
                "--kill-on-exit".to_string(),
                "-n".to_string(),
                "-0".to_string(),
                "/bin/sh".to_string(),
            ]
        );
    }

    #[test]
    fn test_default_seccomp_is_generated() {
        let mut builder = SpecBuilder::new();
        let spec = builder.build(empty_rootfs().path()).unwrap();
        let seccomp = spec.linux().as_ref().unwrap().seccomp().as_ref().unwrap();
        assert!(seccomp.syscalls().as_ref().unwrap().len() >= 1);
    }

    #[test]
    fn test_unconfined_seccomp_has_no_rules() {
        let mut builder = SpecBuilder::new();
        builder.set_seccomp_unconfined();
        let spec = builder.build(empty_rootfs().path()).unwrap();
        let seccomp = spec.linux().as_ref().unwrap().seccomp().as_ref().unwrap();
        assert_eq!(
            seccomp.default_action(),
            oci_spec::runtime::LinuxSeccompAction::ScmpActAllow
        );
        assert!(seccomp
            .syscalls()
            .as_ref()
            .map(|s| s.is_empty())
            .unwrap_or(true));
    }

    #[test]
    fn test_entrypoint_resets_cmd() {
        let mut builder = SpecBuilder::new();
        builder.apply_image(&image_config());
        builder.set_process_entrypoint(vec!["/bin/other".to_string()]);
        let spec = builder.build(empty_rootfs().path()).unwrap();
        assert_eq!(
            spec.process().as_ref().unwrap().args().as_ref().unwrap(),
            &vec!["/bin/other".to_string()]
        );
    }

    #[test]
    fn test_root_path_is_rootfs() {
        let mut builder = SpecBuilder::new();
        let spec = builder.build(empty_rootfs().path()).unwrap();
        assert_eq!(
            spec.root().as_ref().unwrap().path(),
            &PathBuf::from("rootfs")
        );
    }
}
