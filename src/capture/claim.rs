use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::error::CaptureError;

fn live_claim() -> &'static Mutex<Option<String>> {
    static CLAIM: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    CLAIM.get_or_init(|| Mutex::new(None))
}

fn lock_claim() -> MutexGuard<'static, Option<String>> {
    match live_claim().lock() {
        Ok(claim) => claim,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Process-wide exclusive claim on the capture hardware.
///
/// Exactly one claim exists at a time, whichever device it names. The claim
/// is released when the guard is dropped, so every exit path out of a
/// session (stop, failed start, stream fault, unwinding) gives it back.
#[derive(Debug)]
pub struct DeviceClaim {
    device_id: String,
}

impl DeviceClaim {
    /// Claim the capture hardware for `device_id`, failing fast with
    /// `DeviceBusy` while any claim is held.
    pub fn acquire(device_id: &str) -> Result<Self, CaptureError> {
        let mut claim = lock_claim();
        if let Some(holder) = claim.as_deref() {
            log::debug!(
                "DeviceClaim: {} refused, held by {}",
                device_id,
                holder
            );
            return Err(CaptureError::DeviceBusy);
        }
        *claim = Some(device_id.to_string());
        log::debug!("DeviceClaim: acquired {}", device_id);
        Ok(Self {
            device_id: device_id.to_string(),
        })
    }

    /// Device id of the current holder, if any.
    pub fn holder() -> Option<String> {
        lock_claim().clone()
    }

    /// True while a session holds the claim for `device_id`.
    pub fn is_claimed(device_id: &str) -> bool {
        lock_claim().as_deref() == Some(device_id)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        let mut claim = lock_claim();
        if claim.as_deref() == Some(self.device_id.as_str()) {
            *claim = None;
        }
        log::debug!("DeviceClaim: released {}", self.device_id);
    }
}

/// Serializes unit tests that open sessions; the claim is process-wide.
#[cfg(test)]
pub(crate) fn serial() -> MutexGuard<'static, ()> {
    static SERIAL: Mutex<()> = Mutex::new(());
    match SERIAL.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
