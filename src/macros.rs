//! Declarative helpers for the fixed wire tag tables.

/// Generates the EF00 cluster command enum together with its byte lookup.
macro_rules! define_ef00_command {
    ($($variant:ident = $code:literal),* $(,)?) => {
        /// Command identifiers carried in the ZCL header of the EF00 cluster.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Ef00Command {
            $($variant = $code),*
        }

        impl Ef00Command {
            pub fn from_u8(code: u8) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)*
                    _ => None,
                }
            }

            pub fn as_u8(self) -> u8 {
                self as u8
            }
        }
    };
}

/// Generates the datapoint type enum.
///
/// Each entry is `Variant = (tag, "name", "alias"...)`. The tag is the byte
/// written on the wire, the name is used for display and serde, aliases are
/// only accepted when parsing.
macro_rules! define_dp_type {
    ($($variant:ident = ($code:literal, $name:literal $(, $alias:literal)*)),* $(,)?) => {
        /// Tuya datapoint datatype.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum DpType {
            $($variant = $code),*
        }

        impl DpType {
            pub const ALL: &'static [DpType] = &[$(DpType::$variant),*];

            pub fn from_u8(tag: u8) -> Option<Self> {
                match tag {
                    $($code => Some(Self::$variant),)*
                    _ => None,
                }
            }

            pub fn as_u8(self) -> u8 {
                self as u8
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name),*
                }
            }
        }

        impl std::fmt::Display for DpType {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl std::str::FromStr for DpType {
            type Err = $crate::error::DpError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($name $(| $alias)* => Ok(Self::$variant),)*
                    other => Err($crate::error::DpError::UnknownDatatype(other.to_string())),
                }
            }
        }

        impl serde::Serialize for DpType {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.name())
            }
        }

        impl<'de> serde::Deserialize<'de> for DpType {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}
