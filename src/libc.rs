// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use std::{ffi, io, mem, path};

fn sysconf(name: libc::c_int, fallback: u64) -> u64 {
    // SAFETY: valid sysconf call with validation
    let val = unsafe { libc::sysconf(name) };
    if val <= 0 { fallback } else { val as _ }
}

pub fn sysconf_user_hz() -> u64 {
    sysconf(libc::_SC_CLK_TCK, 100)
}

pub fn sysconf_page_size() -> u64 {
    sysconf(libc::_SC_PAGESIZE, 4096)
}

pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions
    let euid = unsafe { libc::geteuid() };
    euid == 0
}

pub struct FsStat {
    pub size: u64,
    pub free: u64,
    pub avail: u64,
    pub files: u64,
    pub files_free: u64,
    pub readonly: bool,
}

pub fn statvfs(path: impl AsRef<path::Path>) -> Result<FsStat> {
    let c_path = ffi::CString::new(path.as_ref().as_os_str().as_encoded_bytes())?;
    let mut stat = mem::MaybeUninit::<libc::statvfs>::uninit();

    // SAFETY: both pointers are valid
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if ret != 0 {
        return Err(io::Error::last_os_error())
            .context(format!("failed to statvfs {:?}", path.as_ref()));
    }
    // SAFETY: ret is 0
    let stat = unsafe { stat.assume_init() };

    let frsize = stat.f_frsize as u64;
    Ok(FsStat {
        size: stat.f_blocks as u64 * frsize,
        free: stat.f_bfree as u64 * frsize,
        avail: stat.f_bavail as u64 * frsize,
        files: stat.f_files as u64,
        files_free: stat.f_ffree as u64,
        readonly: stat.f_flag & libc::ST_RDONLY != 0,
    })
}

pub struct Utsname {
    pub sysname: String,
    pub nodename: String,
    pub release: String,
    pub version: String,
    pub machine: String,
}

fn utsname_field(field: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = field
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn uname() -> Result<Utsname> {
    let mut uts = mem::MaybeUninit::<libc::utsname>::uninit();

    // SAFETY: the pointer is valid
    let ret = unsafe { libc::uname(uts.as_mut_ptr()) };
    if ret != 0 {
        return Err(io::Error::last_os_error()).context("failed to uname");
    }
    // SAFETY: ret is 0
    let uts = unsafe { uts.assume_init() };

    Ok(Utsname {
        sysname: utsname_field(&uts.sysname),
        nodename: utsname_field(&uts.nodename),
        release: utsname_field(&uts.release),
        version: utsname_field(&uts.version),
        machine: utsname_field(&uts.machine),
    })
}
