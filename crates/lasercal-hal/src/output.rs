//! `OutputDevice` trait for the actuator that is switched on for each
//! measurement window (laser enable, shutter, LED driver, …).

use lasercal_types::CalError;

/// A discrete on/off output.
///
/// The scan runtime toggles it exactly twice per step: on when the
/// measurement window opens and off when it closes.
pub trait OutputDevice: Send {
    /// Stable identifier for this output, e.g. `"laser"`.
    fn id(&self) -> &str;

    /// Drive the output to `enabled`.  Must return promptly.
    ///
    /// # Errors
    ///
    /// Returns [`CalError::HardwareFault`] if the command cannot be applied.
    fn set_enabled(&mut self, enabled: bool) -> Result<(), CalError>;

    /// The output's current state.
    fn is_enabled(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockShutter {
        id: String,
        open: bool,
    }

    impl OutputDevice for MockShutter {
        fn id(&self) -> &str {
            &self.id
        }

        fn set_enabled(&mut self, enabled: bool) -> Result<(), CalError> {
            self.open = enabled;
            Ok(())
        }

        fn is_enabled(&self) -> bool {
            self.open
        }
    }

    #[test]
    fn mock_output_toggle() {
        let mut shutter = MockShutter {
            id: "shutter".to_string(),
            open: false,
        };
        assert_eq!(shutter.id(), "shutter");
        assert!(!shutter.is_enabled());

        shutter.set_enabled(true).unwrap();
        assert!(shutter.is_enabled());

        shutter.set_enabled(false).unwrap();
        assert!(!shutter.is_enabled());
    }
}
