use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Alias for `Result` with [`Error`] as the default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error returned by any control-layer operation.
///
/// The device firmware reports failures as a fixed set of negative status
/// codes. The same code space is reproduced here verbatim so that callers
/// bridging to the numeric convention can recover the original value:
///
/// ```
/// use usb5000::Error;
///
/// assert_eq!(Error::TimeOut.code(), -7);
/// assert_eq!(Error::try_from(-7), Ok(Error::TimeOut));
/// ```
///
/// Broadly the codes fall into four groups:
///
/// - resource errors (`NoDevice`, `DeviceIndexOverflow`, `DeviceClosed`,
///   `BadFirmware`) — re-open or pick a valid index, never retried here;
/// - validation errors (`Undefined*`) — rejected before any state is
///   touched, the previous configuration stays in effect;
/// - transient I/O errors (`TransferDataFail`, `TimeOut`,
///   `NotEnoughMemory`) — the caller may retry, FIFO and trigger state
///   stay coherent;
/// - sequencing errors (`NotReading`, `ChanIndexOverflow`) — the call
///   arrived in the wrong order and must be reordered by the caller.
#[derive(
    thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive,
)]
#[repr(i32)]
pub enum Error {
    /// No device is present in the requested slot.
    #[error("no device present in the requested slot")]
    NoDevice = -1,
    /// The slot index lies outside the bounded index space.
    #[error("device index outside the supported range")]
    DeviceIndexOverflow = -2,
    /// The device firmware is missing or reports an unusable version.
    #[error("device firmware is missing or incompatible")]
    BadFirmware = -3,
    /// The handle refers to a device that has been closed.
    #[error("device has been closed")]
    DeviceClosed = -4,
    /// A bulk transfer failed, or a pending stream was forcibly aborted.
    #[error("data transfer failed or stream was aborted")]
    TransferDataFail = -5,
    /// The request exceeds the capture buffer capacity.
    #[error("request exceeds the capture buffer capacity")]
    NotEnoughMemory = -6,
    /// The wait elapsed before the requested points were captured.
    #[error("timed out before the requested points were captured")]
    TimeOut = -7,
    /// The subsystem is armed or mid-stream; reconfigure after it settles.
    #[error("subsystem is busy (armed or streaming)")]
    NotReading = -8,
    /// The channel index is outside the device channel count.
    #[error("channel index outside the device channel count")]
    ChanIndexOverflow = -9,
    /// The requested analog input span is not one of the supported ranges.
    #[error("unsupported analog input range")]
    UndefinedAiRange = -10,
    /// The sample period lies outside the supported clock range.
    #[error("sample period outside the supported clock range")]
    UndefinedSamplePeriod = -11,
    /// The input connect type is not one of the supported wirings.
    #[error("unsupported input connect type")]
    UndefinedAiConnectType = -12,
    /// The sample mode is not supported by the target subsystem.
    #[error("unsupported sample mode")]
    UndefinedAiSampleMode = -13,
    /// A waveform or point count is zero or exceeds the FIFO capacity.
    #[error("wave length is zero or exceeds the FIFO capacity")]
    UndefinedWaveLen = -14,
    /// A parameter value lies outside its enumerated set.
    #[error("parameter outside the supported set")]
    UndefinedParameter = -15,
}

impl Error {
    /// The signed status code used at the device's numeric boundary.
    #[must_use]
    pub fn code(self) -> i32 {
        self.into()
    }
}

#[cfg(test)]
mod test {
    use super::Error;

    #[test]
    fn codes_match_device_convention() {
        let expected = [
            (Error::NoDevice, -1),
            (Error::DeviceIndexOverflow, -2),
            (Error::BadFirmware, -3),
            (Error::DeviceClosed, -4),
            (Error::TransferDataFail, -5),
            (Error::NotEnoughMemory, -6),
            (Error::TimeOut, -7),
            (Error::NotReading, -8),
            (Error::ChanIndexOverflow, -9),
            (Error::UndefinedAiRange, -10),
            (Error::UndefinedSamplePeriod, -11),
            (Error::UndefinedAiConnectType, -12),
            (Error::UndefinedAiSampleMode, -13),
            (Error::UndefinedWaveLen, -14),
            (Error::UndefinedParameter, -15),
        ];
        for (err, code) in expected {
            assert_eq!(err.code(), code);
            assert_eq!(Error::try_from(code), Ok(err));
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(Error::try_from(0).is_err());
        assert!(Error::try_from(-16).is_err());
        assert!(Error::try_from(1).is_err());
    }
}
