//! Raw `bpf(2)` calls that aya does not expose for a bare descriptor.

use std::{io, mem, os::fd::RawFd};

const BPF_OBJ_GET_INFO_BY_FD: libc::c_long = 15;

pub const BPF_OBJ_NAME_LEN: usize = 16;

/// Leading part of the kernel's `struct bpf_prog_info`, up to and including
/// `run_cnt`.
///
/// The kernel copies `min(info_len, sizeof(struct bpf_prog_info))` bytes, so
/// a prefix is enough to reach the stats counters on every kernel that has
/// them. Older kernels simply leave the tail zeroed.
#[repr(C, align(8))]
#[derive(Debug, Default, Clone, Copy)]
pub struct BpfProgInfo {
    pub prog_type: u32,
    pub id: u32,
    pub tag: [u8; 8],
    pub jited_prog_len: u32,
    pub xlated_prog_len: u32,
    pub jited_prog_insns: u64,
    pub xlated_prog_insns: u64,
    pub load_time: u64,
    pub created_by_uid: u32,
    pub nr_map_ids: u32,
    pub map_ids: u64,
    pub name: [u8; BPF_OBJ_NAME_LEN],
    pub ifindex: u32,
    pub gpl_compatible: u32,
    pub netns_dev: u64,
    pub netns_ino: u64,
    pub nr_jited_ksyms: u32,
    pub nr_jited_func_lens: u32,
    pub jited_ksyms: u64,
    pub jited_func_lens: u64,
    pub btf_id: u32,
    pub func_info_rec_size: u32,
    pub func_info: u64,
    pub nr_func_info: u32,
    pub nr_line_info: u32,
    pub line_info: u64,
    pub jited_line_info: u64,
    pub nr_jited_line_info: u32,
    pub line_info_rec_size: u32,
    pub jited_line_info_rec_size: u32,
    pub nr_prog_tags: u32,
    pub prog_tags: u64,
    pub run_time_ns: u64,
    pub run_cnt: u64,
}

/// `info` member of `union bpf_attr`.
#[repr(C)]
struct InfoByFdAttr {
    bpf_fd: u32,
    info_len: u32,
    info: u64,
}

/// Fetches program metadata, including the stats counters, for `fd`.
pub fn prog_info_by_fd(fd: RawFd) -> io::Result<BpfProgInfo> {
    if fd < 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }

    let mut info = BpfProgInfo::default();
    let mut attr = InfoByFdAttr {
        bpf_fd: fd as u32,
        info_len: mem::size_of::<BpfProgInfo>() as u32,
        info: &mut info as *mut BpfProgInfo as u64,
    };

    let ret = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            BPF_OBJ_GET_INFO_BY_FD,
            &mut attr as *mut InfoByFdAttr,
            mem::size_of::<InfoByFdAttr>(),
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(info)
}
