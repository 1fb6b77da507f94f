//! CPU implementations of the draw and copy tasks.

use tessel_core::color::{premultiply, unpremultiply};
use tessel_core::{ColorSpaceXform, IPoint, IRect, ISize, TransferFunction};

use crate::backend::TextureInfo;
use crate::task::{FilterMode, ResampleTask};

fn texel_offset(info: &TextureInfo, x: u32, y: u32) -> usize {
    (y as usize * info.width as usize + x as usize) * info.color_type.bytes_per_pixel()
}

/// Fill `rect` with an already-encoded color.
pub(super) fn fill(data: &mut [u8], info: &TextureInfo, rect: IRect, color: [f32; 4]) {
    let bpp = info.color_type.bytes_per_pixel();
    let mut px = [0u8; 16];
    info.color_type.store(color, &mut px);
    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            let off = texel_offset(info, x, y);
            data[off..off + bpp].copy_from_slice(&px[..bpp]);
        }
    }
}

/// Copy rows of `size` pixels from `src` (with `src_row_bytes` stride) to
/// `dst_point` of a texture of the same color type.
pub(super) fn write_rows(
    dst: &mut [u8],
    dst_info: &TextureInfo,
    dst_point: IPoint,
    src: &[u8],
    src_row_bytes: usize,
    size: ISize,
) {
    let row_len = size.width as usize * dst_info.color_type.bytes_per_pixel();
    for row in 0..size.height {
        let off = texel_offset(dst_info, dst_point.x, dst_point.y + row);
        let src_off = row as usize * src_row_bytes;
        dst[off..off + row_len].copy_from_slice(&src[src_off..src_off + row_len]);
    }
}

/// Copy `rect` of a texture into `out` with `out_row_bytes` stride.
pub(super) fn read_rows(src: &[u8], src_info: &TextureInfo, rect: IRect, out: &mut [u8], out_row_bytes: usize) {
    let row_len = rect.width as usize * src_info.color_type.bytes_per_pixel();
    for row in 0..rect.height {
        let off = texel_offset(src_info, rect.x, rect.y + row);
        let out_off = row as usize * out_row_bytes;
        out[out_off..out_off + row_len].copy_from_slice(&src[off..off + row_len]);
    }
}

struct Sampler<'a> {
    data: &'a [u8],
    info: &'a TextureInfo,
    task: &'a ResampleTask,
    /// Source transfer function to undo before filtering, if any.
    linearize: Option<TransferFunction>,
}

impl Sampler<'_> {
    /// Premultiplied texel, clamped to the source rect.
    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let rect = self.task.src_rect;
        let x = x.clamp(rect.x as i64, rect.right() as i64 - 1) as u32;
        let y = y.clamp(rect.y as i64, rect.bottom() as i64 - 1) as u32;
        let off = texel_offset(self.info, x, y);
        let raw = self.info.color_type.load(&self.data[off..]);
        let premul = self.task.src_color.alpha_type.to_premul(raw);
        match self.linearize {
            Some(tf) => {
                let c = unpremultiply(premul);
                premultiply([tf.invert(c[0]), tf.invert(c[1]), tf.invert(c[2]), c[3]])
            }
            None => premul,
        }
    }

    fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        match self.task.filter {
            FilterMode::Nearest => self.texel(u.floor() as i64, v.floor() as i64),
            FilterMode::Linear => {
                let fx = u - 0.5;
                let fy = v - 0.5;
                let x0 = fx.floor();
                let y0 = fy.floor();
                let tx = fx - x0;
                let ty = fy - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);
                let c00 = self.texel(x0, y0);
                let c10 = self.texel(x0 + 1, y0);
                let c01 = self.texel(x0, y0 + 1);
                let c11 = self.texel(x0 + 1, y0 + 1);
                let mut out = [0.0; 4];
                for i in 0..4 {
                    let top = c00[i] + (c10[i] - c00[i]) * tx;
                    let bottom = c01[i] + (c11[i] - c01[i]) * tx;
                    out[i] = top + (bottom - top) * ty;
                }
                out
            }
        }
    }
}

/// Execute a resample draw covering the whole destination texture.
pub(super) fn resample(src: &[u8], src_info: &TextureInfo, task: &ResampleTask, dst: &mut [u8], dst_info: &TextureInfo) {
    let src_space = task.src_color.color_space;
    let dst_space = task.dst_color.color_space;
    let src_tf = src_space.transfer_function();
    let linearize = (task.linear_blend && src_tf != TransferFunction::Linear).then_some(src_tf);
    let xform = if linearize.is_some() {
        ColorSpaceXform::from_linear(src_space, dst_space)
    } else {
        ColorSpaceXform::new(src_space, dst_space)
    };
    let sampler = Sampler {
        data: src,
        info: src_info,
        task,
        linearize,
    };

    let rect = task.src_rect;
    let scale_x = rect.width as f32 / dst_info.width as f32;
    let scale_y = rect.height as f32 / dst_info.height as f32;
    let bpp = dst_info.color_type.bytes_per_pixel();

    for y in 0..dst_info.height {
        let v = rect.y as f32 + (y as f32 + 0.5) * scale_y;
        for x in 0..dst_info.width {
            let u = rect.x as f32 + (x as f32 + 0.5) * scale_x;
            let color = xform.apply(unpremultiply(sampler.sample(u, v)));
            let out = match task.plane {
                Some(plane) => {
                    let value = plane.apply(color);
                    [value; 4]
                }
                None => task.dst_color.alpha_type.from_premul(premultiply(color)),
            };
            let off = texel_offset(dst_info, x, y);
            dst_info.color_type.store(out, &mut dst[off..off + bpp]);
        }
    }
}
