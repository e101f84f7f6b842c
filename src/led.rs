use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::OutputPin;

/// Activity LED, flashed once at boot and once per handled telegram
pub struct StatusLed<P> {
    pin: P,
    errors: u32,
}

impl<P> StatusLed<P>
where
    P: OutputPin,
    P::Error: core::fmt::Debug,
{
    pub fn new(pin: P) -> Self {
        Self { pin, errors: 0 }
    }

    /// Drive the LED high for `ms`, then low again
    pub fn flash<D: DelayMs<u32>>(&mut self, delay: &mut D, ms: u32) {
        if let Err(e) = self.pin.set_high() {
            self.errors += 1;
            log::warn!("LED: failed to switch on: {:?}", e);
        }
        delay.delay_ms(ms);
        if let Err(e) = self.pin.set_low() {
            self.errors += 1;
            log::warn!("LED: failed to switch off: {:?}", e);
        }
    }

    /// Pin writes that failed since boot
    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn pin(&self) -> &P {
        &self.pin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p1::UnconnectedPin;

    struct BrokenPin;

    impl OutputPin for BrokenPin {
        type Error = &'static str;

        fn set_low(&mut self) -> Result<(), Self::Error> {
            Err("gpio fault")
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            Err("gpio fault")
        }
    }

    #[derive(Default)]
    struct CountingDelay {
        total_ms: u32,
    }

    impl DelayMs<u32> for CountingDelay {
        fn delay_ms(&mut self, ms: u32) {
            self.total_ms += ms;
        }
    }

    #[test]
    fn test_flash_ends_low() {
        let mut led = StatusLed::new(UnconnectedPin::default());
        let mut delay = CountingDelay::default();
        led.flash(&mut delay, 100);
        led.flash(&mut delay, 100);

        assert!(!led.pin().high);
        assert_eq!(led.pin().rising_edges, 2);
        assert_eq!(delay.total_ms, 200);
        assert_eq!(led.errors(), 0);
    }

    #[test]
    fn test_pin_errors_are_counted_not_fatal() {
        let mut led = StatusLed::new(BrokenPin);
        let mut delay = CountingDelay::default();
        led.flash(&mut delay, 100);

        assert_eq!(led.errors(), 2);
        // The delay still runs so the loop timing does not change
        assert_eq!(delay.total_ms, 100);
    }
}
