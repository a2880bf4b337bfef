/*!
 * Frame container
 *
 * A multi-plane media sample: up to `MAX_PLANES` planes, each with its
 * own stride/width/height, aliasing into one contiguous backing buffer
 * owned by the `Frame`. Favors a single owned allocation with typed
 * accessors, the way `ipc/shm/segment.rs`'s `CowMemory` does, over raw
 * per-plane pointers — here there is exactly one `Vec<u8>` and planes
 * are `(offset, stride, width, height)` tuples into it, so `Frame` is
 * `Send`/`Sync` for free and has no lifetime to thread through
 * `fifo::Fifo<Frame>`.
 */

use crate::core::Status;

/// Hard ceiling on plane count: up to 8 planes.
pub const MAX_PLANES: usize = 8;

/// Per-plane width/height ceiling. Chosen generously for 8K 4:2:0 video;
/// `settings::video` validates narrower, encoder-specific bounds on top.
pub const MAX_WIDTH: u32 = 7680;
pub const MAX_HEIGHT: u32 = 4320;

/// Base alignment `Frame::duplicate` realigns destination strides to.
/// 32 bytes covers AVX2 row access without over-allocating for the
/// common 1-D PCM case.
pub const DUPLICATE_BASE_ALIGN: usize = 32;

/// Sample format carried by a `Frame`. The set is deliberately closed
/// but left open to extension via non-exhaustive matching elsewhere in
/// the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SampleFormat {
    Undefined,
    /// Planar YUV 4:2:0: plane 0 is Y, plane 1 is U (half width/height),
    /// plane 2 is V (half width/height).
    PlanarYuv420,
    /// Interleaved signed 16-bit PCM: one plane, `width` carries the
    /// byte length and `height == 1`.
    InterleavedS16Pcm,
    /// Planar signed 16-bit PCM: one plane per channel, each a 1-D
    /// byte run (`height == 1`).
    PlanarS16Pcm,
}

impl Default for SampleFormat {
    fn default() -> Self {
        SampleFormat::Undefined
    }
}

/// Describes one plane's placement inside `Frame`'s backing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offset: usize,
    pub stride: usize,
    pub width: u32,
    pub height: u32,
}

impl PlaneLayout {
    fn row_bytes(&self) -> usize {
        self.width as usize
    }

    fn total_bytes(&self) -> usize {
        self.stride * self.height.max(1) as usize
    }
}

/// A multi-plane raw or compressed media sample. Up to `MAX_PLANES`
/// planes alias into one owned `Vec<u8>`.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Vec<u8>,
    planes: Vec<PlaneLayout>,
    format: SampleFormat,
    sample_rate: u32,
    pts: i64,
    dts: i64,
    stream_id: u32,
}

/// Timestamp value meaning "unset", per `core::types::TIMESTAMP_UNSET`.
pub const TIMESTAMP_UNSET: i64 = crate::core::types::TIMESTAMP_UNSET;

/// One plane's description as supplied to `Frame::new`: width, height,
/// and the row-major bytes to copy in (length must be
/// `stride * height` for the implied stride, see `Frame::new`'s doc).
pub struct PlaneInput<'a> {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub rows: &'a [u8],
}

impl Frame {
    /// Builds a frame from up to `MAX_PLANES` planes, validating that
    /// for every populated plane:
    /// `stride >= width > 0`, `height > 0`, `width <= MAX_WIDTH`, and
    /// `height <= MAX_HEIGHT` (or `height == 1` for 1-D payloads where
    /// `width` carries the byte length). Planes are packed
    /// back-to-back into one contiguous allocation in input order.
    pub fn new(
        format: SampleFormat,
        sample_rate: u32,
        pts: i64,
        dts: i64,
        stream_id: u32,
        planes: &[PlaneInput<'_>],
    ) -> Result<Self, Status> {
        if planes.is_empty() {
            return Err(Status::InvalidArgument("frame has no planes".into()));
        }
        if planes.len() > MAX_PLANES {
            return Err(Status::InvalidArgument(format!(
                "frame has {} planes, max is {MAX_PLANES}",
                planes.len()
            )));
        }

        let mut total = 0usize;
        let mut layouts = Vec::with_capacity(planes.len());
        for p in planes {
            validate_plane_dims(p.width, p.height, p.stride)?;
            let expected_len = p.stride * p.height.max(1) as usize;
            if p.rows.len() != expected_len {
                return Err(Status::InvalidArgument(format!(
                    "plane rows length {} does not match stride*height {}",
                    p.rows.len(),
                    expected_len
                )));
            }
            layouts.push(PlaneLayout {
                offset: total,
                stride: p.stride,
                width: p.width,
                height: p.height,
            });
            total += expected_len;
        }

        let mut data = Vec::with_capacity(total);
        for p in planes {
            data.extend_from_slice(p.rows);
        }

        Ok(Frame {
            data,
            planes: layouts,
            format,
            sample_rate,
            pts,
            dts,
            stream_id,
        })
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn set_format(&mut self, format: SampleFormat) {
        self.format = format;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    pub fn dts(&self) -> i64 {
        self.dts
    }

    pub fn set_dts(&mut self, dts: i64) {
        self.dts = dts;
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn plane_layout(&self, index: usize) -> Option<PlaneLayout> {
        self.planes.get(index).copied()
    }

    /// Row-major bytes of plane `index`, `stride * height` long
    /// (including any tail padding beyond `width` per row).
    pub fn plane_bytes(&self, index: usize) -> Option<&[u8]> {
        let layout = self.planes.get(index)?;
        let end = layout.offset + layout.total_bytes();
        Some(&self.data[layout.offset..end])
    }

    /// `width` bytes of row `y` within plane `index`, ignoring any
    /// stride padding.
    pub fn plane_row(&self, index: usize, y: u32) -> Option<&[u8]> {
        let layout = self.planes.get(index)?;
        if y >= layout.height.max(1) {
            return None;
        }
        let row_start = layout.offset + layout.stride * y as usize;
        let row_end = row_start + layout.row_bytes();
        Some(&self.data[row_start..row_end])
    }

    /// Total backing-buffer size in bytes, used by `fifo::FifoElement`.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Deep-duplicates the frame: recomputes `stride[i] = align_up(src.stride[i],
    /// DUPLICATE_BASE_ALIGN)` for every plane, allocates one contiguous
    /// buffer sized to cover all the realigned planes, and copies each
    /// plane row by row into the new layout. Metadata is copied
    /// verbatim. `dup(dup(f))` is byte-equal to `dup(f)` because
    /// realignment is idempotent on an already-aligned stride.
    pub fn duplicate(&self) -> Frame {
        let mut new_layouts = Vec::with_capacity(self.planes.len());
        let mut total = 0usize;
        for layout in &self.planes {
            let stride = align_up(layout.stride, DUPLICATE_BASE_ALIGN);
            new_layouts.push(PlaneLayout {
                offset: total,
                stride,
                width: layout.width,
                height: layout.height,
            });
            total += stride * layout.height.max(1) as usize;
        }

        let mut data = vec![0u8; total];
        for (src, dst) in self.planes.iter().zip(&new_layouts) {
            let rows = dst.height.max(1);
            for y in 0..rows {
                let src_start = src.offset + src.stride * y as usize;
                let src_row = &self.data[src_start..src_start + src.row_bytes()];
                let dst_start = dst.offset + dst.stride * y as usize;
                data[dst_start..dst_start + dst.row_bytes()].copy_from_slice(src_row);
            }
        }

        Frame {
            data,
            planes: new_layouts,
            format: self.format,
            sample_rate: self.sample_rate,
            pts: self.pts,
            dts: self.dts,
            stream_id: self.stream_id,
        }
    }
}

impl crate::fifo::FifoElement for Frame {
    fn byte_size(&self) -> usize {
        self.byte_len()
    }
}

fn validate_plane_dims(width: u32, height: u32, stride: usize) -> Result<(), Status> {
    if width == 0 {
        return Err(Status::InvalidArgument("plane width is zero".into()));
    }
    if height == 0 {
        return Err(Status::InvalidArgument("plane height is zero".into()));
    }
    if (stride as u64) < width as u64 {
        return Err(Status::InvalidArgument(format!(
            "plane stride {stride} is narrower than width {width}"
        )));
    }
    if width > MAX_WIDTH {
        return Err(Status::InvalidArgument(format!(
            "plane width {width} exceeds MAX_WIDTH {MAX_WIDTH}"
        )));
    }
    if height > MAX_HEIGHT && height != 1 {
        return Err(Status::InvalidArgument(format!(
            "plane height {height} exceeds MAX_HEIGHT {MAX_HEIGHT}"
        )));
    }
    Ok(())
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}
