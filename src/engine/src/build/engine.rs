//! The build engine: executes build operations against the stores.
//!
//! Every operation follows the same control flow: compute a
//! fingerprint, consult the build cache, and either adopt the cached
//! image or perform the operation and commit the result as a
//! config-only or layer commit. A bundle is composed lazily for
//! RUN/COPY and reused across consecutive filesystem operations of one
//! stage; any failure closes and discards it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use skiff_core::error::{Context, Result, SkiffError};
use skiff_core::idmap::UserSpec;

use crate::bundle::{BundleStore, LockedBundle, SpecBuilder};
use crate::digest::Digest;
use crate::image::{Image, ImageImporter, LockedImageStore};
use crate::oci::{EmptyObject, History, ImageConfig, now_rfc3339};
use crate::runtime::ContainerRuntime;
use crate::store::fsspec::FsSpec;
use crate::tar::resolve_safe;

use super::{BuildCache, ImageBuilder};

/// Engine settings.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Operate without privileges (user-namespace bundles).
    pub rootless: bool,
    /// PRoot binary for user-id emulation inside build containers.
    pub proot_path: Option<PathBuf>,
}

/// Drives a build against an image store, a bundle store, the build
/// cache and an external runtime.
pub struct BuildEngine<'a> {
    images: &'a LockedImageStore,
    bundles: &'a BundleStore,
    cache: &'a BuildCache,
    runtime: &'a dyn ContainerRuntime,
    importer: &'a dyn ImageImporter,
    options: BuildOptions,

    config: ImageConfig,
    image: Option<Image>,
    bundle: Option<LockedBundle>,
    snapshot: FsSpec,
    stage_names: HashMap<String, Digest>,
    current_stage_names: Vec<String>,
}

impl<'a> BuildEngine<'a> {
    pub fn new(
        images: &'a LockedImageStore,
        bundles: &'a BundleStore,
        cache: &'a BuildCache,
        runtime: &'a dyn ContainerRuntime,
        importer: &'a dyn ImageImporter,
        options: BuildOptions,
    ) -> Self {
        Self {
            images,
            bundles,
            cache,
            runtime,
            importer,
            options,
            config: ImageConfig::new(),
            image: None,
            bundle: None,
            snapshot: FsSpec::empty(),
            stage_names: HashMap::new(),
            current_stage_names: Vec::new(),
        }
    }

    /// The image of the last committed operation.
    pub fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }

    /// Close the in-flight bundle and return the built image.
    pub fn finish(mut self) -> Result<Image> {
        self.close_bundle();
        self.image
            .take()
            .ok_or_else(|| SkiffError::InvalidInput("no image was built".to_string()))
    }

    fn set_image(&mut self, image: Image) {
        self.config = image.config().clone();
        self.image = Some(image);
    }

    fn close_bundle(&mut self) {
        if let Some(bundle) = self.bundle.take() {
            tracing::debug!(bundle = %bundle.id(), "closing build bundle");
            drop(bundle);
        }
    }

    /// Bind the names registered for the stage that just ended to its
    /// final image, for later `COPY --from` resolution.
    fn bind_stage_names(&mut self) {
        let names = std::mem::take(&mut self.current_stage_names);
        if let Some(image) = &self.image {
            for name in names {
                self.stage_names.insert(name, image.id().clone());
            }
        }
    }

    /// The common cached control flow around one operation.
    fn cached<F>(&mut self, fingerprint: &str, action: F) -> Result<()>
    where
        F: FnOnce(&mut Self, &str) -> Result<()>,
    {
        tracing::info!("{fingerprint}");
        let parent = self.image.as_ref().map(|i| i.id().clone());

        match self.cache.get(parent.as_ref(), fingerprint) {
            Ok(cached_id) => match self.images.image(&cached_id) {
                Ok(image) => {
                    tracing::info!("  -> using cached image {}", image.id());
                    self.set_image(image);
                    return Ok(());
                }
                // The cached image was garbage-collected; rebuild.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            },
            Err(e) if e.is_cache_miss() => {}
            Err(e) => return Err(e),
        }

        tracing::info!("  -> building ...");
        if let Err(e) = action(self, fingerprint) {
            self.close_bundle();
            return Err(e);
        }

        let image_id = self
            .image
            .as_ref()
            .expect("operation committed an image")
            .id()
            .clone();
        self.cache.put(parent.as_ref(), fingerprint, &image_id)?;
        tracing::info!("  -> built image {image_id}");
        Ok(())
    }

    /// Append a history entry and commit the configuration.
    fn commit_config(&mut self, comment: &str) -> Result<()> {
        let mut config = self.config.clone();
        config.history.push(History {
            created: Some(now_rfc3339()),
            author: config.author.clone(),
            created_by: config.author.clone(),
            comment: Some(comment.to_string()),
            empty_layer: Some(true),
        });
        let image = self
            .images
            .add_image_config(config, self.image.as_ref())
            .context("commit config")?;
        self.set_image(image);
        Ok(())
    }

    /// Commit the bundle's rootfs changes as a new layer and move the
    /// bundle's parent forward.
    fn commit_layer(&mut self, comment: &str) -> Result<()> {
        tracing::info!("  -> committing layer ...");
        let rootfs = self
            .bundle
            .as_ref()
            .expect("layer commit requires a bundle")
            .rootfs();
        let author = self.config.author.clone();
        let (image, new_spec) = self.images.add_image_layer(
            &rootfs,
            self.image.as_ref(),
            &self.snapshot,
            author.as_deref(),
            comment,
        )?;
        let spec_digest = self.images.fsspecs().put(&new_spec)?;
        if let Some(bundle) = &self.bundle {
            bundle.set_parent(image.id(), &spec_digest)?;
        }
        self.snapshot = new_spec;
        self.set_image(image);
        Ok(())
    }

    /// Compose (or refresh) the build bundle. Build containers run with
    /// host networking; rootless and PRoot settings follow the engine
    /// options.
    fn init_bundle(&mut self, command: Option<(&[String], &[(String, String)])>) -> Result<()> {
        let mut builder = SpecBuilder::new();
        builder.apply_image(&self.config);
        if self.options.rootless {
            builder.to_rootless();
        }
        if let Some(proot) = &self.options.proot_path {
            builder.set_proot_path(proot);
        }
        builder.use_host_network();
        if let Some((args, env)) = command {
            builder.set_process_entrypoint(args.to_vec());
            for (key, value) in env {
                builder.add_process_env(key, value);
            }
        }

        if self.bundle.is_none() {
            let bundle =
                self.bundles
                    .create(None, self.image.as_ref(), self.images, &mut builder)?;
            self.snapshot = self.images.fsspecs().get(&bundle.fsspec_digest()?)?;
            self.bundle = Some(bundle);
        } else if command.is_some() {
            let bundle = self.bundle.as_ref().expect("bundle checked above");
            let spec = builder.build(&bundle.rootfs())?;
            bundle.set_spec(&spec)?;
        }
        Ok(())
    }

    fn resolve_source_image(&self, source: &str) -> Result<Image> {
        if let Some(id) = self.stage_names.get(source) {
            return self.images.image(id);
        }
        match self.images.image_by_name(source) {
            Ok(image) => Ok(image),
            Err(e) if e.is_not_found() => self.images.import_image(self.importer, source),
            Err(e) => Err(e),
        }
    }

    /// Shared implementation of COPY/ADD from a directory.
    fn copy_from_dir(
        &mut self,
        verb: &str,
        origin: &str,
        base_dir: &Path,
        patterns: &[String],
        dest: &str,
        chown: Option<&UserSpec>,
    ) -> Result<()> {
        let sources = resolve_sources(base_dir, patterns)
            .context(&format!("{} {}", verb.to_lowercase(), origin))?;
        let content_digest = digest_sources(&sources)?;

        let chown_part = chown
            .map(|c| format!("--chown={c} "))
            .unwrap_or_default();
        let fingerprint = format!("{verb} {chown_part}{origin}{content_digest} {dest}");

        let dest = dest.to_string();
        let chown = chown.cloned();
        self.cached(&fingerprint, |engine, comment| {
            engine.init_bundle(None)?;
            let rootfs = engine.bundle.as_ref().expect("bundle open").rootfs();
            let working_dir = engine.config.config.working_dir.clone();
            copy_into_rootfs(
                &rootfs,
                &sources,
                &dest,
                working_dir.as_deref(),
                chown.as_ref(),
                engine.images,
            )?;
            engine.commit_layer(comment)
        })
    }
}

impl ImageBuilder for BuildEngine<'_> {
    fn build_name(&mut self, name: &str) {
        self.current_stage_names.push(name.to_string());
    }

    fn from_image(&mut self, image_ref: &str) -> Result<()> {
        self.bind_stage_names();
        self.close_bundle();
        tracing::info!("FROM {image_ref}");

        if image_ref == "scratch" {
            self.image = None;
            self.config = ImageConfig::new();
            self.snapshot = FsSpec::empty();
            return Ok(());
        }

        let image = self.resolve_source_image(image_ref)?;
        self.snapshot = FsSpec::empty();
        self.set_image(image);
        Ok(())
    }

    fn set_author(&mut self, author: &str) -> Result<()> {
        self.config.author = Some(author.to_string());
        self.cached(&format!("AUTHOR {author}"), Self::commit_config_action)
    }

    fn set_working_dir(&mut self, dir: &str) -> Result<()> {
        let dir = absolute_path(dir, self.config.config.working_dir.as_deref());
        self.config.config.working_dir = Some(dir.clone());
        self.cached(&format!("WORKDIR {dir}"), Self::commit_config_action)
    }

    fn set_entrypoint(&mut self, entrypoint: Vec<String>) -> Result<()> {
        let fingerprint = format!("ENTRYPOINT {}", json(&entrypoint)?);
        self.config.config.entrypoint = Some(entrypoint);
        self.cached(&fingerprint, Self::commit_config_action)
    }

    fn set_cmd(&mut self, cmd: Vec<String>) -> Result<()> {
        let fingerprint = format!("CMD {}", json(&cmd)?);
        self.config.config.cmd = Some(cmd);
        self.cached(&fingerprint, Self::commit_config_action)
    }

    fn add_env(&mut self, env: Vec<(String, String)>) -> Result<()> {
        let fingerprint = format!("ENV {}", json(&env)?);
        for (key, value) in &env {
            self.config.config.set_env(key, value);
        }
        self.cached(&fingerprint, Self::commit_config_action)
    }

    fn add_labels(&mut self, labels: Vec<(String, String)>) -> Result<()> {
        let fingerprint = format!("LABEL {}", json(&labels)?);
        for (key, value) in labels {
            self.config.config.labels.insert(key, value);
        }
        self.cached(&fingerprint, Self::commit_config_action)
    }

    fn add_exposed_ports(&mut self, ports: Vec<String>) -> Result<()> {
        let ports: Vec<String> = ports.iter().map(|p| normalize_port(p)).collect();
        let fingerprint = format!("EXPOSE {}", json(&ports)?);
        for port in ports {
            self.config
                .config
                .exposed_ports
                .insert(port, EmptyObject {});
        }
        self.cached(&fingerprint, Self::commit_config_action)
    }

    fn add_volumes(&mut self, volumes: Vec<String>) -> Result<()> {
        let fingerprint = format!("VOLUME {}", json(&volumes)?);
        for volume in volumes {
            self.config.config.volumes.insert(volume, EmptyObject {});
        }
        self.cached(&fingerprint, Self::commit_config_action)
    }

    fn set_user(&mut self, user: &str) -> Result<()> {
        self.config.config.user = Some(user.to_string());
        self.cached(&format!("USER {user}"), Self::commit_config_action)
    }

    fn set_stop_signal(&mut self, signal: &str) -> Result<()> {
        self.config.config.stop_signal = Some(signal.to_string());
        self.cached(&format!("STOPSIGNAL {signal}"), Self::commit_config_action)
    }

    fn copy_files(
        &mut self,
        context_dir: &Path,
        patterns: &[String],
        dest: &str,
        chown: Option<&UserSpec>,
    ) -> Result<()> {
        self.copy_from_dir("COPY", "", context_dir, patterns, dest, chown)
    }

    fn copy_files_from_image(
        &mut self,
        source: &str,
        patterns: &[String],
        dest: &str,
        chown: Option<&UserSpec>,
    ) -> Result<()> {
        let image = self
            .resolve_source_image(source)
            .context(&format!("copy --from={source}"))?;
        let base_dir = self.images.materialize_rootfs(&image)?;
        let origin = format!("--from={} ", image.id());
        self.copy_from_dir("COPY", &origin, &base_dir, patterns, dest, chown)
    }

    fn add_files(
        &mut self,
        context_dir: &Path,
        patterns: &[String],
        dest: &str,
        chown: Option<&UserSpec>,
    ) -> Result<()> {
        self.copy_from_dir("ADD", "", context_dir, patterns, dest, chown)
    }

    fn run(&mut self, args: Vec<String>, env: Vec<(String, String)>) -> Result<()> {
        if self.image.is_none() {
            return Err(SkiffError::InvalidInput(
                "cannot run a command in an empty image".to_string(),
            ));
        }
        let fingerprint = run_fingerprint(&args, &env);
        self.cached(&fingerprint, |engine, comment| {
            engine.init_bundle(Some((args.as_slice(), env.as_slice())))?;
            let bundle = engine.bundle.as_ref().expect("bundle open");
            engine.runtime.run(bundle).context("run build step")?;
            engine.commit_layer(comment)
        })
    }

    fn tag(&mut self, name: &str) -> Result<()> {
        let id = self
            .image
            .as_ref()
            .ok_or_else(|| SkiffError::InvalidInput("no image to tag".to_string()))?
            .id()
            .clone();
        let image = self.images.tag_image(&id, name)?;
        self.set_image(image);
        Ok(())
    }
}

impl BuildEngine<'_> {
    /// Adapter so config mutations can share `cached`.
    fn commit_config_action(&mut self, comment: &str) -> Result<()> {
        self.commit_config(comment)
    }
}

/// The RUN fingerprint: the literal shell command plus the build args
/// pinned at the time of the call, so identical text under different
/// ARG values never collides.
fn run_fingerprint(args: &[String], env: &[(String, String)]) -> String {
    let mut fingerprint = match args {
        [shell, flag, command] if shell == "/bin/sh" && flag == "-c" => {
            format!("RUN /bin/sh -c {command:?}")
        }
        _ => format!(
            "RUN {}",
            serde_json::to_string(args).unwrap_or_default()
        ),
    };
    if !env.is_empty() {
        let mut env: Vec<_> = env.to_vec();
        env.sort();
        fingerprint.push_str(&format!(
            " ENV {}",
            serde_json::to_string(&env).unwrap_or_default()
        ));
    }
    fingerprint
}

fn json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| SkiffError::Serialization(e.to_string()))
}

/// `8080` becomes `8080/tcp`; explicit protocols pass through.
fn normalize_port(port: &str) -> String {
    if port.contains('/') {
        port.to_string()
    } else {
        format!("{port}/tcp")
    }
}

fn absolute_path(path: &str, base: Option<&str>) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        let base = base.unwrap_or("/").trim_end_matches('/');
        format!("{base}/{path}")
    }
}

/// A resolved copy source: absolute host path plus its name at the
/// destination.
#[derive(Debug, Clone)]
struct CopySource {
    path: PathBuf,
    name: String,
}

/// Expand copy patterns against a base directory. `*` and `?` match
/// within the final path component.
fn resolve_sources(base_dir: &Path, patterns: &[String]) -> Result<Vec<CopySource>> {
    let mut sources = Vec::new();
    for pattern in patterns {
        let relative = pattern.trim_start_matches('/');
        if relative.contains('*') || relative.contains('?') {
            let (parent, name_pattern) = match relative.rsplit_once('/') {
                Some((parent, name)) => (base_dir.join(parent), name),
                None => (base_dir.to_path_buf(), relative),
            };
            let mut matched = false;
            let mut entries: Vec<_> = std::fs::read_dir(&parent)
                .map_err(|e| {
                    SkiffError::NotFound(format!("source {pattern:?}: {e}"))
                })?
                .collect::<std::io::Result<_>>()
                .map_err(|e| SkiffError::Other(format!("read {}: {e}", parent.display())))?;
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                if wildcard_match(name_pattern, &name) {
                    matched = true;
                    sources.push(CopySource {
                        path: entry.path(),
                        name,
                    });
                }
            }
            if !matched {
                return Err(SkiffError::NotFound(format!(
                    "no source matches {pattern:?}"
                )));
            }
        } else {
            let path = base_dir.join(relative);
            if !path.exists() {
                return Err(SkiffError::NotFound(format!("source {pattern:?}")));
            }
            let name = Path::new(relative)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| relative.to_string());
            sources.push(CopySource { path, name });
        }
    }
    Ok(sources)
}

/// Glob-lite: `*` and `?` within one name.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    fn matches(p: &[char], n: &[char]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some('?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    matches(&p, &n)
}

/// Digest the resolved sources (names, modes and contents) so the copy
/// fingerprint changes whenever the context does.
fn digest_sources(sources: &[CopySource]) -> Result<Digest> {
    use std::os::unix::fs::PermissionsExt;

    fn hash_path(path: &Path, name: &str, out: &mut Vec<u8>) -> Result<()> {
        let meta = std::fs::symlink_metadata(path)
            .map_err(|e| SkiffError::Other(format!("stat {}: {e}", path.display())))?;
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(format!(" {:o} ", meta.permissions().mode() & 0o7777).as_bytes());
        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(path)
                .map_err(|e| SkiffError::Other(format!("readlink {}: {e}", path.display())))?;
            out.extend_from_slice(b"link ");
            out.extend_from_slice(target.to_string_lossy().as_bytes());
        } else if meta.is_dir() {
            out.extend_from_slice(b"dir\n");
            let mut entries: Vec<_> = std::fs::read_dir(path)
                .map_err(|e| SkiffError::Other(format!("read {}: {e}", path.display())))?
                .collect::<std::io::Result<_>>()
                .map_err(|e| SkiffError::Other(format!("read {}: {e}", path.display())))?;
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let child_name = format!("{name}/{}", entry.file_name().to_string_lossy());
                hash_path(&entry.path(), &child_name, out)?;
            }
            return Ok(());
        } else {
            let file = std::fs::File::open(path)
                .map_err(|e| SkiffError::Other(format!("open {}: {e}", path.display())))?;
            let (digest, _) = Digest::sha256_of_reader(file)?;
            out.extend_from_slice(digest.to_string().as_bytes());
        }
        out.push(b'\n');
        Ok(())
    }

    let mut buf = Vec::new();
    for source in sources {
        hash_path(&source.path, &source.name, &mut buf)?;
    }
    Ok(Digest::sha256_of(&buf))
}

/// Copy resolved sources into the bundle rootfs at `dest`.
fn copy_into_rootfs(
    rootfs: &Path,
    sources: &[CopySource],
    dest: &str,
    working_dir: Option<&str>,
    chown: Option<&UserSpec>,
    images: &LockedImageStore,
) -> Result<()> {
    let dest_abs = absolute_path(dest, working_dir);
    let dest_path = resolve_safe(rootfs, Path::new(&dest_abs))?;
    let dest_is_dir = dest.ends_with('/')
        || dest_abs == "/"
        || sources.len() > 1
        || dest_path.is_dir()
        || sources.iter().any(|s| s.path.is_dir());

    let owner = match chown {
        Some(user) => {
            let ids = user.resolve(rootfs)?;
            let idmap = images.idmap();
            match (idmap.host_uid(ids.uid), idmap.host_gid(ids.gid)) {
                (Some(uid), Some(gid)) => Some((uid, gid)),
                _ => None,
            }
        }
        None => None,
    };

    let mut copied = Vec::new();
    for source in sources {
        let target = if dest_is_dir {
            dest_path.join(&source.name)
        } else {
            dest_path.clone()
        };
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SkiffError::Other(format!("create {}: {e}", parent.display()))
            })?;
        }
        copy_path(&source.path, &target)?;
        copied.push(target);
    }

    if let Some((uid, gid)) = owner {
        for path in &copied {
            chown_recursive(path, uid, gid)?;
        }
    }
    Ok(())
}

fn copy_path(src: &Path, dst: &Path) -> Result<()> {
    let meta = std::fs::symlink_metadata(src)
        .map_err(|e| SkiffError::Other(format!("stat {}: {e}", src.display())))?;
    if meta.file_type().is_symlink() {
        let target = std::fs::read_link(src)
            .map_err(|e| SkiffError::Other(format!("readlink {}: {e}", src.display())))?;
        if dst.is_symlink() || dst.is_file() {
            let _ = std::fs::remove_file(dst);
        }
        std::os::unix::fs::symlink(&target, dst)
            .map_err(|e| SkiffError::Other(format!("symlink {}: {e}", dst.display())))?;
    } else if meta.is_dir() {
        std::fs::create_dir_all(dst)
            .map_err(|e| SkiffError::Other(format!("create {}: {e}", dst.display())))?;
        std::fs::set_permissions(dst, meta.permissions())
            .map_err(|e| SkiffError::Other(format!("chmod {}: {e}", dst.display())))?;
        let mut entries: Vec<_> = std::fs::read_dir(src)
            .map_err(|e| SkiffError::Other(format!("read {}: {e}", src.display())))?
            .collect::<std::io::Result<_>>()
            .map_err(|e| SkiffError::Other(format!("read {}: {e}", src.display())))?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            copy_path(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        std::fs::copy(src, dst).map_err(|e| {
            SkiffError::Other(format!(
                "copy {} to {}: {e}",
                src.display(),
                dst.display()
            ))
        })?;
    }
    Ok(())
}

fn chown_recursive(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let is_symlink = path.is_symlink();
    let result = if is_symlink {
        std::os::unix::fs::lchown(path, Some(uid), Some(gid))
    } else {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))
    };
    if let Err(e) = result {
        if e.raw_os_error() == Some(nix::errno::Errno::EPERM as i32) {
            tracing::debug!(path = %path.display(), "skipping chown without privileges");
            return Ok(());
        }
        return Err(SkiffError::Other(format!(
            "chown {}: {e}",
            path.display()
        )));
    }
    if !is_symlink && path.is_dir() {
        for entry in std::fs::read_dir(path)
            .map_err(|e| SkiffError::Other(format!("read {}: {e}", path.display())))?
        {
            let entry =
                entry.map_err(|e| SkiffError::Other(format!("read dir entry: {e}")))?;
            chown_recursive(&entry.path(), uid, gid)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_fingerprint_shell_form() {
        let args = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo hello".to_string(),
        ];
        assert_eq!(
            run_fingerprint(&args, &[]),
            "RUN /bin/sh -c \"echo hello\""
        );
    }

    #[test]
    fn test_run_fingerprint_includes_build_args() {
        let args = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "use-token".to_string(),
        ];
        let with_env = run_fingerprint(
            &args,
            &[("TOKEN".to_string(), "one".to_string())],
        );
        let with_other_env = run_fingerprint(
            &args,
            &[("TOKEN".to_string(), "two".to_string())],
        );
        assert_ne!(with_env, with_other_env);
        assert_ne!(with_env, run_fingerprint(&args, &[]));
    }

    #[test]
    fn test_run_fingerprint_env_order_independent() {
        let args = vec!["/bin/true".to_string()];
        let ab = run_fingerprint(
            &args,
            &[
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string()),
            ],
        );
        let ba = run_fingerprint(
            &args,
            &[
                ("B".to_string(), "2".to_string()),
                ("A".to_string(), "1".to_string()),
            ],
        );
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_normalize_port() {
        assert_eq!(normalize_port("8080"), "8080/tcp");
        assert_eq!(normalize_port("53/udp"), "53/udp");
    }

    #[test]
    fn test_absolute_path() {
        assert_eq!(absolute_path("/usr/bin", Some("/app")), "/usr/bin");
        assert_eq!(absolute_path("src", Some("/app")), "/app/src");
        assert_eq!(absolute_path("app", None), "/app");
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*.txt", "notes.txt"));
        assert!(!wildcard_match("*.txt", "notes.md"));
        assert!(wildcard_match("file-?", "file-a"));
        assert!(wildcard_match("*", "anything"));
        assert!(!wildcard_match("?", ""));
    }

    #[test]
    fn test_resolve_sources_plain_and_glob() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "b").unwrap();
        std::fs::write(tmp.path().join("c.md"), "c").unwrap();

        let sources =
            resolve_sources(tmp.path(), &["*.txt".to_string(), "c.md".to_string()]).unwrap();
        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.md"]);

        let err = resolve_sources(tmp.path(), &["*.rs".to_string()]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_digest_sources_tracks_content() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("file"), "v1").unwrap();
        let sources = resolve_sources(tmp.path(), &["file".to_string()]).unwrap();
        let before = digest_sources(&sources).unwrap();

        std::fs::write(tmp.path().join("file"), "v2").unwrap();
        let after = digest_sources(&sources).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_digest_sources_recurses_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("site")).unwrap();
        std::fs::write(tmp.path().join("site/index.html"), "<html>").unwrap();
        let sources = resolve_sources(tmp.path(), &["site".to_string()]).unwrap();
        let before = digest_sources(&sources).unwrap();

        std::fs::write(tmp.path().join("site/style.css"), "body{}").unwrap();
        let after = digest_sources(&sources).unwrap();
        assert_ne!(before, after);
    }
}
