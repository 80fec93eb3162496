use std::path::Path;

/// Get available disk space for a given path (in bytes)
pub fn get_available_disk_space(path: &Path) -> u64 {
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::ffi::OsStrExt;
        use windows::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;

        let path_wide: Vec<u16> = path.as_os_str()
            .encode_wide()
            .chain(Some(0))
            .collect();

        let mut free_bytes = 0u64;
        unsafe {
            if GetDiskFreeSpaceExW(
                windows::core::PCWSTR(path_wide.as_ptr()),
                None,
                None,
                Some(&mut free_bytes),
            ).is_ok() {
                return free_bytes;
            }
        }
        crate::debug::log("WARNING: Failed to get disk space on Windows, assuming sufficient space");
        u64::MAX // Assume sufficient space if we can't check
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        use std::os::unix::ffi::OsStrExt;
        let path_cstr = std::ffi::CString::new(path.as_os_str().as_bytes()).unwrap_or_default();
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };

        unsafe {
            if libc::statvfs(path_cstr.as_ptr(), &mut stat) == 0 {
                // Cast both to u64 to handle platforms where they're u32 (macOS, ARM32)
                return (stat.f_bavail as u64) * (stat.f_bsize as u64);
            }
        }
        crate::debug::log("WARNING: Failed to get disk space on Unix, assuming sufficient space");
        u64::MAX
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        let _ = path;
        crate::debug::log("WARNING: Disk space check not supported on this platform");
        u64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_some_space_for_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(get_available_disk_space(dir.path()) > 0);
    }
}
