//! Flash device abstraction.
//!
//! The persistence layer owns a region of some [`FlashDevice`] and is the
//! only component that touches it. The device contract is the usual NOR one:
//! erase turns a whole page to 0xFF, programming can only clear bits, and
//! both calls block with bounded hardware latency.
//!
//! [`MemFlash`] is the host/test double with the same semantics plus counted
//! fault injection. On the ESP32 the engine runs over a data partition via
//! [`PartitionFlash`].

/// Flash-layer failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashError {
    /// Hardware erase/program/read failure, or out-of-bounds access.
    DeviceFault,
    /// Region exhausted and wraparound is disabled.
    RegionFull,
}

impl core::fmt::Display for FlashError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FlashError::DeviceFault => write!(f, "flash device fault"),
            FlashError::RegionFull => write!(f, "flash region full"),
        }
    }
}

/// Contiguous flash region descriptor.
///
/// `base` is the device address of the first byte; `size` must be a nonzero
/// multiple of `page_size`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashRegion {
    pub base: u32,
    pub size: u32,
    pub page_size: u32,
}

impl FlashRegion {
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.size / self.page_size
    }
}

/// Erase/program/read primitives presented by a flash controller.
///
/// Addresses are device-absolute; the store adds the region base.
pub trait FlashDevice {
    /// Read `buf.len()` bytes at `addr`.
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Erase one page starting at `addr` (page-aligned) to 0xFF.
    fn erase_page(&mut self, addr: u32, len: u32) -> Result<(), FlashError>;

    /// Program bytes at `addr`. The target must have been erased first;
    /// programming can only clear bits.
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError>;
}

/// In-memory flash with NOR semantics, for host demos and tests.
///
/// Injected faults fail the next N erase/program calls without touching the
/// array, modeling a transient controller error.
pub struct MemFlash<const SIZE: usize> {
    mem: [u8; SIZE],
    page_size: u32,
    program_faults: u32,
    erase_faults: u32,
}

impl<const SIZE: usize> MemFlash<SIZE> {
    pub fn new(page_size: u32) -> Self {
        Self {
            mem: [0xFF; SIZE],
            page_size,
            program_faults: 0,
            erase_faults: 0,
        }
    }

    /// Region descriptor covering the whole device.
    pub fn region(&self) -> FlashRegion {
        FlashRegion {
            base: 0,
            size: SIZE as u32,
            page_size: self.page_size,
        }
    }

    /// Fail the next `n` program calls.
    pub fn inject_program_faults(&mut self, n: u32) {
        self.program_faults = n;
    }

    /// Fail the next `n` erase calls.
    pub fn inject_erase_faults(&mut self, n: u32) {
        self.erase_faults = n;
    }

    /// Flip bits at `addr`, simulating on-die corruption.
    pub fn corrupt(&mut self, addr: u32, xor: u8) {
        self.mem[addr as usize] ^= xor;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mem
    }
}

impl<const SIZE: usize> FlashDevice for MemFlash<SIZE> {
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = addr as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or(FlashError::DeviceFault)?;
        let src = self.mem.get(start..end).ok_or(FlashError::DeviceFault)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn erase_page(&mut self, addr: u32, len: u32) -> Result<(), FlashError> {
        if self.erase_faults > 0 {
            self.erase_faults -= 1;
            return Err(FlashError::DeviceFault);
        }
        if addr % self.page_size != 0 || len != self.page_size {
            return Err(FlashError::DeviceFault);
        }
        let start = addr as usize;
        let end = start + len as usize;
        let page = self.mem.get_mut(start..end).ok_or(FlashError::DeviceFault)?;
        page.fill(0xFF);
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        if self.program_faults > 0 {
            self.program_faults -= 1;
            return Err(FlashError::DeviceFault);
        }
        let start = addr as usize;
        let end = start.checked_add(data.len()).ok_or(FlashError::DeviceFault)?;
        let dst = self.mem.get_mut(start..end).ok_or(FlashError::DeviceFault)?;
        for (cell, byte) in dst.iter_mut().zip(data) {
            // NOR: programming clears bits, never sets them.
            *cell &= *byte;
        }
        Ok(())
    }
}

/// ESP32 data-partition flash device.
#[cfg(target_os = "espidf")]
pub struct PartitionFlash {
    part: *const esp_idf_svc::sys::esp_partition_t,
}

// SAFETY: the partition table lives in static memory for the whole run and
// the esp_partition_* calls serialize hardware access internally.
#[cfg(target_os = "espidf")]
unsafe impl Send for PartitionFlash {}

#[cfg(target_os = "espidf")]
impl PartitionFlash {
    /// Locate a data partition by label.
    pub fn data_partition(label: &core::ffi::CStr) -> Option<Self> {
        let part = unsafe {
            esp_idf_svc::sys::esp_partition_find_first(
                esp_idf_svc::sys::esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                esp_idf_svc::sys::esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
                label.as_ptr(),
            )
        };
        if part.is_null() {
            None
        } else {
            Some(Self { part })
        }
    }

    /// Region descriptor covering the whole partition.
    pub fn region(&self) -> FlashRegion {
        let (size, erase_size) = unsafe { ((*self.part).size, (*self.part).erase_size) };
        FlashRegion {
            base: 0,
            size,
            page_size: erase_size,
        }
    }
}

#[cfg(target_os = "espidf")]
impl FlashDevice for PartitionFlash {
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let err = unsafe {
            esp_idf_svc::sys::esp_partition_read(
                self.part,
                addr as _,
                buf.as_mut_ptr() as *mut _,
                buf.len() as _,
            )
        };
        if err == 0 {
            Ok(())
        } else {
            Err(FlashError::DeviceFault)
        }
    }

    fn erase_page(&mut self, addr: u32, len: u32) -> Result<(), FlashError> {
        let err = unsafe {
            esp_idf_svc::sys::esp_partition_erase_range(self.part, addr as _, len as _)
        };
        if err == 0 {
            Ok(())
        } else {
            Err(FlashError::DeviceFault)
        }
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let err = unsafe {
            esp_idf_svc::sys::esp_partition_write(
                self.part,
                addr as _,
                data.as_ptr() as *const _,
                data.len() as _,
            )
        };
        if err == 0 {
            Ok(())
        } else {
            Err(FlashError::DeviceFault)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erase_then_program() {
        let mut flash: MemFlash<1024> = MemFlash::new(512);
        flash.erase_page(0, 512).unwrap();
        flash.program(0, &[0xA5, 0x5A]).unwrap();

        let mut buf = [0u8; 4];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xA5, 0x5A, 0xFF, 0xFF]);
    }

    #[test]
    fn test_program_only_clears_bits() {
        let mut flash: MemFlash<1024> = MemFlash::new(512);
        flash.erase_page(0, 512).unwrap();
        flash.program(0, &[0x0F]).unwrap();
        flash.program(0, &[0xF0]).unwrap();

        let mut buf = [0u8; 1];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0x00);
    }

    #[test]
    fn test_unaligned_erase_rejected() {
        let mut flash: MemFlash<1024> = MemFlash::new(512);
        assert_eq!(flash.erase_page(100, 512), Err(FlashError::DeviceFault));
    }

    #[test]
    fn test_injected_faults_count_down() {
        let mut flash: MemFlash<1024> = MemFlash::new(512);
        flash.erase_page(0, 512).unwrap();
        flash.inject_program_faults(2);
        assert_eq!(flash.program(0, &[0]), Err(FlashError::DeviceFault));
        assert_eq!(flash.program(0, &[0]), Err(FlashError::DeviceFault));
        assert!(flash.program(0, &[0]).is_ok());
    }

    #[test]
    fn test_out_of_bounds_read() {
        let flash: MemFlash<1024> = MemFlash::new(512);
        let mut buf = [0u8; 8];
        assert_eq!(flash.read(1020, &mut buf), Err(FlashError::DeviceFault));
    }
}
