use crate::{Error, Result};

/// Replication strategy of a volume, packed into a three-digit code
///
/// The digits are, from left to right: copies on different data
/// centers, copies on different racks within the same data center, and
/// copies on different nodes within the same rack. Each digit is in
/// `[0, 2]`. `000` means a single copy.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ReplicaPlacement {
    /// Copies on other nodes in the same rack
    pub same_rack_count: u8,

    /// Copies on other racks in the same data center
    pub diff_rack_count: u8,

    /// Copies on other data centers
    pub diff_data_center_count: u8,
}

impl ReplicaPlacement {
    /// Parses the packed byte form (`diff_dc * 100 + diff_rack * 10 + same_rack`).
    ///
    /// # Errors
    ///
    /// Will return `Err` if a digit is outside `[0, 2]`.
    pub fn from_byte(b: u8) -> Result<Self> {
        format!("{b:03}").parse()
    }

    /// Packs the three digits into one byte.
    #[must_use]
    pub fn byte(&self) -> u8 {
        self.diff_data_center_count * 100 + self.diff_rack_count * 10 + self.same_rack_count
    }

    /// Total number of copies, including the primary.
    #[must_use]
    pub fn copy_count(&self) -> usize {
        usize::from(self.diff_data_center_count)
            + usize::from(self.diff_rack_count)
            + usize::from(self.same_rack_count)
            + 1
    }
}

impl std::str::FromStr for ReplicaPlacement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() > 3 {
            return Err(Error::InvalidArgument(format!(
                "unknown replication type: {s:?}"
            )));
        }

        let mut rp = Self::default();
        for (i, c) in s.chars().enumerate() {
            let count = match c {
                '0'..='2' => c as u8 - b'0',
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "unknown replication type: {s:?}"
                    )))
                }
            };
            match i {
                0 => rp.diff_data_center_count = count,
                1 => rp.diff_rack_count = count,
                _ => rp.same_rack_count = count,
            }
        }
        Ok(rp)
    }
}

impl std::fmt::Display for ReplicaPlacement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.diff_data_center_count, self.diff_rack_count, self.same_rack_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn replica_placement_round_trip() -> crate::Result<()> {
        for code in ["000", "001", "010", "100", "212", "022"] {
            let rp = code.parse::<ReplicaPlacement>()?;
            assert_eq!(code, rp.to_string());
            assert_eq!(rp, ReplicaPlacement::from_byte(rp.byte())?);
        }
        Ok(())
    }

    #[test]
    fn replica_placement_copy_count() -> crate::Result<()> {
        assert_eq!(1, "000".parse::<ReplicaPlacement>()?.copy_count());
        assert_eq!(2, "001".parse::<ReplicaPlacement>()?.copy_count());
        assert_eq!(4, "111".parse::<ReplicaPlacement>()?.copy_count());
        Ok(())
    }

    #[test]
    fn replica_placement_rejects_bad_digits() {
        assert!("003".parse::<ReplicaPlacement>().is_err());
        assert!("abc".parse::<ReplicaPlacement>().is_err());
        assert!("0000".parse::<ReplicaPlacement>().is_err());
    }
}
