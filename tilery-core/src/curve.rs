//! The space-filling-curve key: a 64-bit Morton interleave of the two
//! 32-bit world coordinates. Sorting by this key gives the pipeline its
//! spatial locality, and the top `2z` bits of a key identify the tile
//! containing the point at zoom `z`.

/// Spread the bits of `v` into the even bit positions of a u64.
fn spread(v: u32) -> u64 {
    let mut x = u64::from(v);
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

/// Collapse the even bit positions of a u64 back into a u32.
fn squash(v: u64) -> u32 {
    let mut x = v & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x >> 4)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x >> 8)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x >> 16)) & 0x0000_0000_FFFF_FFFF;
    x as u32
}

/// Interleave world coordinates into a curve key. `y` occupies the odd
/// (higher) bit positions so the key's numeric order walks tiles row-major.
#[must_use]
pub fn encode(x: u32, y: u32) -> u64 {
    spread(x) | (spread(y) << 1)
}

/// Inverse of [`encode`].
#[must_use]
pub fn decode(index: u64) -> (u32, u32) {
    (squash(index), squash(index >> 1))
}

/// The tile at zoom `z` that a curve key falls into.
#[must_use]
pub fn key_to_tile(index: u64, z: u8) -> (u32, u32) {
    if z == 0 {
        return (0, 0);
    }
    let (x, y) = decode(index);
    (x >> (32 - u32::from(z)), y >> (32 - u32::from(z)))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0)]
    #[case(1, 0)]
    #[case(0, 1)]
    #[case(u32::MAX, u32::MAX)]
    #[case(0xDEAD_BEEF, 0x1234_5678)]
    #[case(u32::MAX, 0)]
    fn test_encode_bijection(#[case] x: u32, #[case] y: u32) {
        assert_eq!(decode(encode(x, y)), (x, y));
    }

    #[test]
    fn test_key_order_is_spatial() {
        // Two points in the same z1 quadrant sort together, away from a
        // point in another quadrant.
        let a = encode(10, 10);
        let b = encode(20, 20);
        let c = encode(1 << 31, 1 << 31);
        assert!(a < c && b < c);
    }

    #[test]
    fn test_key_to_tile() {
        assert_eq!(key_to_tile(encode(0, 0), 2), (0, 0));
        assert_eq!(key_to_tile(encode(u32::MAX, u32::MAX), 2), (3, 3));
        assert_eq!(key_to_tile(encode(1 << 31, 0), 1), (1, 0));
    }

    #[test]
    fn test_zero_is_zero() {
        assert_eq!(encode(0, 0), 0);
    }
}
