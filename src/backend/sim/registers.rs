//! Register file of the software device model

use crate::error::{PlatformError, PlatformResult};
use crate::platform::regs;

/// Bank of 32-bit registers with the Fletcher control handshake
///
/// Writing `CONTROL_START` to the control register completes the run
/// immediately (`STATUS_DONE | STATUS_IDLE`); writing `CONTROL_RESET`
/// clears every register but control and leaves the unit idle.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    regs: Vec<u32>,
}

impl RegisterFile {
    pub fn new(count: usize) -> Self {
        let mut regs = vec![0u32; count];
        if let Some(status) = regs.get_mut(regs::REG_STATUS as usize) {
            *status = regs::STATUS_IDLE;
        }
        Self { regs }
    }

    pub fn read(&self, index: u64) -> PlatformResult<u32> {
        let slot = self.slot(index)?;
        Ok(self.regs[slot])
    }

    pub fn write(&mut self, index: u64, value: u32) -> PlatformResult<()> {
        let slot = self.slot(index)?;
        self.regs[slot] = value;

        if index == regs::REG_CONTROL {
            self.on_control_write(value);
        }
        Ok(())
    }

    fn on_control_write(&mut self, value: u32) {
        let status = regs::REG_STATUS as usize;
        if status >= self.regs.len() {
            return;
        }
        if value & regs::CONTROL_RESET != 0 {
            for (i, reg) in self.regs.iter_mut().enumerate() {
                if i != regs::REG_CONTROL as usize {
                    *reg = 0;
                }
            }
            self.regs[status] = regs::STATUS_IDLE;
        } else if value & regs::CONTROL_START != 0 {
            self.regs[status] = regs::STATUS_DONE | regs::STATUS_IDLE;
        } else if value & regs::CONTROL_STOP != 0 {
            self.regs[status] = regs::STATUS_IDLE;
        }
    }

    fn slot(&self, index: u64) -> PlatformResult<usize> {
        usize::try_from(index)
            .ok()
            .filter(|&i| i < self.regs.len())
            .ok_or_else(|| PlatformError::RegisterAccessFailed {
                offset: index,
                reason: format!("outside the {}-register space", self.regs.len()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_idle() {
        let rf = RegisterFile::new(16);
        assert_eq!(rf.read(regs::REG_STATUS).unwrap(), regs::STATUS_IDLE);
        assert_eq!(rf.read(regs::REG_CONTROL).unwrap(), 0);
    }

    #[test]
    fn test_plain_register_roundtrip() {
        let mut rf = RegisterFile::new(16);
        rf.write(7, 0xDEAD_BEEF).unwrap();
        assert_eq!(rf.read(7).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_start_completes_run() {
        let mut rf = RegisterFile::new(16);
        rf.write(regs::REG_CONTROL, regs::CONTROL_START).unwrap();
        let status = rf.read(regs::REG_STATUS).unwrap();
        assert_ne!(status & regs::STATUS_DONE, 0);
    }

    #[test]
    fn test_reset_clears_registers() {
        let mut rf = RegisterFile::new(16);
        rf.write(5, 42).unwrap();
        rf.write(regs::REG_CONTROL, regs::CONTROL_START).unwrap();
        rf.write(regs::REG_CONTROL, regs::CONTROL_RESET).unwrap();
        assert_eq!(rf.read(5).unwrap(), 0);
        assert_eq!(rf.read(regs::REG_STATUS).unwrap(), regs::STATUS_IDLE);
        assert_eq!(rf.read(regs::REG_CONTROL).unwrap(), regs::CONTROL_RESET);
    }

    #[test]
    fn test_out_of_range_access() {
        let mut rf = RegisterFile::new(4);
        assert!(matches!(
            rf.read(4),
            Err(PlatformError::RegisterAccessFailed { offset: 4, .. })
        ));
        assert!(rf.write(u64::MAX, 1).is_err());
    }
}
