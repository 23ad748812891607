// SPDX-License-Identifier: GPL-3.0-only

use tracing::warn;

/// Decode a UDisks2 byte string (`ay`) into text.
///
/// Every NUL byte is dropped, not only the terminator. Returns `None` when the
/// remaining bytes are not valid UTF-8.
pub fn decode_byte_string(bytes: &[u8]) -> Option<String> {
    let stripped: Vec<u8> = bytes.iter().copied().filter(|b| *b != 0).collect();
    String::from_utf8(stripped).ok()
}

/// Decode every non-empty entry of a `MountPoints` value, in order.
pub fn decode_mount_points(mount_points: &[Vec<u8>]) -> Vec<String> {
    mount_points
        .iter()
        .filter(|mp| !mp.is_empty())
        .filter_map(|mp| match decode_byte_string(mp) {
            Some(decoded) if !decoded.is_empty() => Some(decoded),
            Some(_) => None,
            None => {
                warn!("Skipping mount point that is not valid UTF-8: {:?}", mp);
                None
            }
        })
        .collect()
}

/// First usable mount point, if any.
pub fn first_mount_point(mount_points: &[Vec<u8>]) -> Option<String> {
    decode_mount_points(mount_points).into_iter().next()
}
