//! Address encoder
//!
//! Maps an endpoint's network ID to its offset inside the endpoint region
//! of a (tenant, segment, host) address block. Offsets 1 and 2 are reserved
//! for the gateway and DHCP, so the first endpoint lands on offset 3 and each
//! following endpoint is `2^stride` further along.

use crate::error::IpamError;

/// Offset of the first endpoint (1 is the gateway, 2 is DHCP)
pub const FIRST_ENDPOINT_OFFSET: u64 = 3;

/// Largest stride accepted for IPv4
pub const MAX_STRIDE: u8 = 31;

/// Computes `3 + 2^stride * network_id`, checked against `width` bits.
///
/// # Errors
///
/// Returns `ConfigurationFault` if `stride` exceeds [`MAX_STRIDE`] or the
/// offset does not fit in `width` bits. Nothing wraps silently.
pub fn effective_offset(network_id: u64, stride: u8, width: u8) -> Result<u64, IpamError> {
    if stride > MAX_STRIDE {
        return Err(IpamError::ConfigurationFault(format!(
            "stride {} exceeds maximum of {} bits",
            stride, MAX_STRIDE
        )));
    }

    let offset = network_id
        .checked_mul(1u64 << stride)
        .and_then(|v| v.checked_add(FIRST_ENDPOINT_OFFSET))
        .ok_or_else(|| IpamError::ConfigurationFault(format!(
            "effective network ID overflows for network ID {} (stride {})",
            network_id, stride
        )))?;

    if width < 64 && offset >> width != 0 {
        return Err(IpamError::ConfigurationFault(format!(
            "endpoint space exhausted: effective network ID {} for network ID {} (stride {}) does not fit in {} endpoint bits",
            offset, network_id, stride, width
        )));
    }

    Ok(offset)
}

/// Inverse of [`effective_offset`].
///
/// Returns `None` for reserved offsets and offsets that are not on a stride
/// boundary.
pub fn network_id_for_offset(offset: u64, stride: u8) -> Option<u64> {
    if stride > MAX_STRIDE {
        return None;
    }
    let relative = offset.checked_sub(FIRST_ENDPOINT_OFFSET)?;
    let block = 1u64 << stride;
    if relative % block != 0 {
        return None;
    }
    Some(relative >> stride)
}
