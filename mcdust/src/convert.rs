#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub fn u64_from_f64(x: f64) -> u64 {
    x.max(0.0) as u64
}

#[allow(clippy::cast_precision_loss)]
pub fn f64_from_u64(x: u64) -> f64 {
    x as f64
}

#[allow(clippy::cast_precision_loss)]
pub fn f64_from_usize(x: usize) -> f64 {
    x as f64
}

#[allow(clippy::cast_possible_truncation)]
pub fn usize_from_u64(x: u64) -> usize {
    x as usize
}

pub fn u64_from_usize(x: usize) -> u64 {
    x as u64
}
