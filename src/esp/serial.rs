use crate::p1::SerialPort;
use esp_idf_hal::delay::NON_BLOCK;
use esp_idf_hal::sys::EspError;
use esp_idf_hal::uart::UartDriver;

impl SerialPort for UartDriver<'_> {
    type Error = EspError;

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.read(buf, NON_BLOCK)
    }
}
