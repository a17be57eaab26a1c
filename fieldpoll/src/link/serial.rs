/// Number of data bits per character
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum DataBits {
    /// 5 bits
    Five,
    /// 6 bits
    Six,
    /// 7 bits
    Seven,
    /// 8 bits
    Eight,
}

/// Flow control setting of the port
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum FlowControl {
    /// no flow control
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

/// Parity checking mode
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum Parity {
    /// no parity bit
    None,
    /// odd parity
    Odd,
    /// even parity
    Even,
}

/// Number of stop bits
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum StopBits {
    /// one stop bit
    One,
    /// two stop bits
    Two,
}

/// Serial port settings
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(rename_all = "camelCase", default))]
pub struct SerialSettings {
    /// baud rate of the port
    pub baud_rate: u32,
    /// number of data bits
    pub data_bits: DataBits,
    /// flow control
    pub flow_control: FlowControl,
    /// number of stop bits
    pub stop_bits: StopBits,
    /// parity setting
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(value: DataBits) -> Self {
        match value {
            DataBits::Five => tokio_serial::DataBits::Five,
            DataBits::Six => tokio_serial::DataBits::Six,
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(value: FlowControl) -> Self {
        match value {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

pub(crate) fn open(
    path: &str,
    settings: SerialSettings,
) -> tokio_serial::Result<tokio_serial::SerialStream> {
    let builder = tokio_serial::new(path, settings.baud_rate)
        .data_bits(settings.data_bits.into())
        .flow_control(settings.flow_control.into())
        .parity(settings.parity.into())
        .stop_bits(settings.stop_bits.into());
    tokio_serial::SerialStream::open(&builder)
}
