use crate::snippet::selection::BoundingBox;

/// Cut `bbox` out of a row-major `width` x `height` buffer.
///
/// The result has `bbox.width() * bbox.height()` elements. Coordinates that
/// fall outside the source image are filled with `T::default()`.
pub fn snippet_of_buffer<T: Copy + Default>(data: &[T], width: usize, height: usize, bbox: &BoundingBox) -> Vec<T> {
    let mut out = Vec::with_capacity(bbox.area());

    for row in bbox.top..bbox.bottom {
        for col in bbox.left..bbox.right {
            let inside = row >= 0 && col >= 0 && (row as usize) < height && (col as usize) < width;
            let value = if inside {
                data.get(row as usize * width + col as usize).copied().unwrap_or_default()
            } else {
                T::default()
            };
            out.push(value);
        }
    }

    out
}
