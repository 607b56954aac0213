//! # Boot hand-off tracing

use kernel_info::boot::{KernelBootInfo, PixelFormat};
use log::info;

pub fn trace_boot_info(boot_info: &KernelBootInfo) {
    info!(
        concat!(
            "boot info at {bi:#018x}\n",
            "  mmap  ptr = {mmap_ptr:#018x}, len = {mmap_len}, desc size = {mmap_desc_size}\n",
            "  fb    ptr = {fb_ptr:#018x}, size = {fb_size}, {fb_width}x{fb_height}, stride = {fb_stride}, format = {fb_fmt}\n",
            "  init  ptr = {init_ptr:#018x}, len = {init_len}"
        ),
        bi = core::ptr::from_ref(boot_info) as usize,
        mmap_ptr = boot_info.mmap.mmap_ptr,
        mmap_len = boot_info.mmap.mmap_len,
        mmap_desc_size = boot_info.mmap.mmap_desc_size,
        fb_ptr = boot_info.fb.base,
        fb_size = boot_info.fb.size,
        fb_width = boot_info.fb.width,
        fb_height = boot_info.fb.height,
        fb_stride = boot_info.fb.stride,
        fb_fmt = match boot_info.fb.format {
            PixelFormat::Rgba8 => "RGBA8",
            PixelFormat::Bgra8 => "BGRA8",
            PixelFormat::Bitmask => "bitmask",
        },
        init_ptr = boot_info.init_image.ptr,
        init_len = boot_info.init_image.len,
    );
}
