/// Human-readable byte count, formatted with binary (KiB/MiB/...) units.
///
/// Used throughout logging in the datastore and pipeline crates, mirroring
/// how the reference backup tooling reports transfer speed and dedup ratio.
pub struct HumanByte {
    b: u64,
}

impl std::fmt::Display for HumanByte {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.b < 1024 {
            return write!(f, "{} B", self.b);
        }
        let kb = self.b as f64 / 1024.0;
        if kb < 1024.0 {
            return write!(f, "{:.2} KiB", kb);
        }
        let mb = kb / 1024.0;
        if mb < 1024.0 {
            return write!(f, "{:.2} MiB", mb);
        }
        let gb = mb / 1024.0;
        if gb < 1024.0 {
            return write!(f, "{:.2} GiB", gb);
        }
        let tb = gb / 1024.0;
        write!(f, "{:.2} TiB", tb)
    }
}

impl From<usize> for HumanByte {
    fn from(v: usize) -> Self {
        HumanByte { b: v as u64 }
    }
}

impl From<u64> for HumanByte {
    fn from(v: u64) -> Self {
        HumanByte { b: v }
    }
}

#[test]
fn correct_byte_convert() {
    fn convert(b: u64) -> String {
        HumanByte::from(b).to_string()
    }
    assert_eq!(convert(1023), "1023 B");
    assert_eq!(convert(1 << 10), "1.00 KiB");
    assert_eq!(convert(1 << 20), "1.00 MiB");
    assert_eq!(convert((1 << 30) + 103 * (1 << 20)), "1.10 GiB");
}
