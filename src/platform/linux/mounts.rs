use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use rand::Rng;

use crate::core::error::{Error, Result};
use crate::core::model::Mount;
use crate::util::fs::{ensure_dir, ensure_file};

/// Run the full RootfsSetup sequence inside a fresh mount namespace, before
/// hostname or `/proc`/`/dev` are touched. A no-op (the "compat path") when
/// `rootfs` is empty.
pub fn setup_rootfs(
    rootfs: &str,
    mounts: &[Mount],
    volumes: &dyn crate::collaborators::volume::VolumeStore,
) -> Result<()> {
    if rootfs.is_empty() {
        return Ok(());
    }

    let rootfs = validate_rootfs_dir(rootfs)?;

    super::namespaces::make_mount_propagation_private()?;
    bind_mount_self(&rootfs)?;

    mount_user_mounts_at(&rootfs, mounts, volumes)?;

    pivot_into(&rootfs)?;

    mount_proc_in_new_root()?;
    mount_dev_in_new_root()?;
    mount_sys_in_new_root();

    Ok(())
}

/// Validate the rootfs path: must exist and be a directory. A regular file,
/// or a missing path, is `InvalidConfig`.
fn validate_rootfs_dir(rootfs: &str) -> Result<PathBuf> {
    let path = Path::new(rootfs);
    let metadata = fs::metadata(path)
        .map_err(|_| Error::invalid_config(format!("rootfs path '{rootfs}' does not exist")))?;
    if !metadata.is_dir() {
        return Err(Error::invalid_config(format!(
            "rootfs path '{rootfs}' is not a directory"
        )));
    }
    fs::canonicalize(path)
        .map_err(|e| Error::invalid_config(format!("cannot canonicalize rootfs '{rootfs}': {e}")))
}

/// Bind-mount the rootfs onto itself, recursively, then mark it private.
/// `pivot_root` requires the new root to already be a mount point.
fn bind_mount_self(rootfs: &Path) -> Result<()> {
    mount(
        Some(rootfs),
        rootfs,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )?;
    mount(
        None::<&str>,
        rootfs,
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )?;
    Ok(())
}

/// Pre-mount every user `Mount` under `<root>/<target>`. Used both for the
/// pre-`pivot_root` pass (`root` = the rootfs, still in the host mount
/// namespace) and for the compat no-rootfs path (`root` = `/`, already
/// inside the container's own mount namespace).
pub(crate) fn mount_user_mounts_at(
    root: &Path,
    mounts: &[Mount],
    volumes: &dyn crate::collaborators::volume::VolumeStore,
) -> Result<()> {
    for m in mounts {
        let source = resolve_source(m, volumes)?;
        let target = join_under_root(root, m.target());
        prepare_target(&source, &target)?;

        let source_is_dir = fs::metadata(&source)?.is_dir();
        let flags = if source_is_dir {
            MsFlags::MS_BIND | MsFlags::MS_REC
        } else {
            MsFlags::MS_BIND
        };
        mount(Some(&source), &target, None::<&str>, flags, None::<&str>)?;

        if m.read_only() {
            let mut remount_flags = MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY;
            if source_is_dir {
                remount_flags |= MsFlags::MS_REC;
            }
            mount(
                Some(&source),
                &target,
                None::<&str>,
                remount_flags,
                None::<&str>,
            )?;
        }
    }
    Ok(())
}

fn resolve_source(
    m: &Mount,
    volumes: &dyn crate::collaborators::volume::VolumeStore,
) -> Result<PathBuf> {
    match m {
        Mount::Bind { source, .. } => Ok(PathBuf::from(source)),
        Mount::Volume {
            name,
            resolved_host_path,
            ..
        } => {
            if let Some(p) = resolved_host_path {
                Ok(PathBuf::from(p))
            } else {
                Ok(volumes.get(name)?.path)
            }
        }
    }
}

fn join_under_root(rootfs: &Path, target: &str) -> PathBuf {
    rootfs.join(target.trim_start_matches('/'))
}

/// Ensure the mount target exists with a kind matching the source: a
/// directory source gets `mkdir -p`, a file source gets an empty file (and
/// its parent directories). A kind mismatch against a pre-existing target is
/// `InvalidConfig`.
fn prepare_target(source: &Path, target: &Path) -> Result<()> {
    let source_is_dir = fs::metadata(source)?.is_dir();

    if target.exists() {
        let target_is_dir = fs::metadata(target)?.is_dir();
        if target_is_dir != source_is_dir {
            return Err(Error::invalid_config(format!(
                "mount target {} is a {} but source {} is a {}",
                target.display(),
                if target_is_dir { "directory" } else { "file" },
                source.display(),
                if source_is_dir { "directory" } else { "file" },
            )));
        }
        return Ok(());
    }

    if source_is_dir {
        ensure_dir(target).map_err(|e| Error::IoFailure(e.to_string()))
    } else {
        ensure_file(target).map_err(|e| Error::IoFailure(e.to_string()))
    }
}

/// `pivot_root` into `new_root`, putting the old root at a randomly-named
/// `.pivot_root<suffix>` directory so concurrent containers never collide,
/// then lazily unmount and remove it.
fn pivot_into(new_root: &Path) -> Result<()> {
    let suffix: u64 = rand::thread_rng().gen();
    let put_old = new_root.join(format!(".pivot_root{suffix:016x}"));
    fs::create_dir_all(&put_old)?;

    nix::unistd::pivot_root(new_root, &put_old)?;
    nix::unistd::chdir("/")?;

    let old_root_in_new = Path::new("/").join(put_old.file_name().unwrap());
    umount2(&old_root_in_new, MntFlags::MNT_DETACH)?;
    fs::remove_dir(&old_root_in_new)?;
    Ok(())
}

/// Mount `/proc`, remounting over any prior entry left by a previous
/// container sharing this mount namespace.
fn mount_proc_in_new_root() -> Result<()> {
    let proc_dir = Path::new("/proc");
    fs::create_dir_all(proc_dir)?;
    let _ = umount2(proc_dir, MntFlags::MNT_DETACH);

    mount(
        Some("proc"),
        proc_dir,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )?;
    Ok(())
}

/// Mount a tmpfs `/dev`, essential device nodes, `/dev/pts`, and the
/// standard symlinks.
fn mount_dev_in_new_root() -> Result<()> {
    let dev_dir = Path::new("/dev");
    fs::create_dir_all(dev_dir)?;

    mount(
        Some("tmpfs"),
        dev_dir,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=0755"),
    )?;

    create_dev_nodes();
    create_dev_symlinks();
    mount_devpts();

    Ok(())
}

/// Create essential character device nodes. Individual failures are warnings
/// only — a restrictive host may deny `mknod` even to root in some
/// configurations, and the container can often still function without one.
fn create_dev_nodes() {
    use nix::sys::stat;

    let perm = stat::Mode::from_bits_truncate(0o666);
    let devices = [
        ("/dev/null", stat::makedev(1, 3)),
        ("/dev/zero", stat::makedev(1, 5)),
        ("/dev/full", stat::makedev(1, 7)),
        ("/dev/random", stat::makedev(1, 8)),
        ("/dev/urandom", stat::makedev(1, 9)),
        ("/dev/tty", stat::makedev(5, 0)),
    ];

    for (path, dev) in &devices {
        if let Err(e) = stat::mknod(Path::new(path), stat::SFlag::S_IFCHR, perm, *dev) {
            log::warn!("failed to create device node {path}: {e}");
        }
    }
}

fn create_dev_symlinks() {
    let links: [(&str, &str); 4] = [
        ("/proc/self/fd", "/dev/fd"),
        ("/proc/self/fd/0", "/dev/stdin"),
        ("/proc/self/fd/1", "/dev/stdout"),
        ("/proc/self/fd/2", "/dev/stderr"),
    ];
    for (target, link) in links {
        if let Err(e) = symlink(target, link) {
            log::warn!("failed to create symlink {link} -> {target}: {e}");
        }
    }
}

fn mount_devpts() {
    let pts_dir = Path::new("/dev/pts");
    if let Err(e) = fs::create_dir_all(pts_dir) {
        log::warn!("failed to create /dev/pts: {e}");
        return;
    }
    let result = mount(
        Some("devpts"),
        pts_dir,
        Some("devpts"),
        MsFlags::empty(),
        Some("newinstance,ptmxmode=0666,mode=0620"),
    );
    match result {
        Ok(()) => {
            if let Err(e) = symlink("pts/ptmx", "/dev/ptmx") {
                log::warn!("failed to create /dev/ptmx symlink: {e}");
            }
        }
        Err(e) => log::warn!("failed to mount devpts: {e}"),
    }
}

/// Mount `/sys` read-only. Degraded to a warning on failure (some sandboxed
/// hosts deny mounting sysfs even read-only).
fn mount_sys_in_new_root() {
    let sys_dir = Path::new("/sys");
    if let Err(e) = fs::create_dir_all(sys_dir) {
        log::warn!("failed to create /sys: {e}");
        return;
    }
    let result = mount(
        Some("sysfs"),
        sys_dir,
        Some("sysfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV | MsFlags::MS_RDONLY,
        None::<&str>,
    );
    if let Err(e) = result {
        log::warn!("failed to mount /sys read-only: {e}");
    }
}
