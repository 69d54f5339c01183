use crate::arch::ArchitectureId;
use crate::header::{FatOrder, FatVariant};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io;

/// One entry of the descriptor table following the `fat_header`.
///
/// This structure covers both on-disk layouts. The classic `fat_arch` record
/// stores `offset` and `size` as 32-bit words; `fat_arch_64` widens them to
/// 64 bits and appends a reserved word. Which one applies is decided by the
/// container's [`FatVariant`], never by the host.
///
/// ```text
/// fat_arch      cputype:u32 cpusubtype:u32 offset:u32 size:u32 align:u32
/// fat_arch_64   cputype:u32 cpusubtype:u32 offset:u64 size:u64 align:u32 reserved:u32
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceDescriptor {
    /// CPU type of the embedded image (e.g. `CPU_TYPE_X86_64`).
    pub cputype: u32,

    /// CPU subtype, including any capability bits in the high byte.
    pub cpusubtype: u32,

    /// File offset of the slice's first byte.
    pub offset: u64,

    /// Length of the slice in bytes.
    pub size: u64,

    /// Alignment of `offset` as a power-of-two exponent.
    pub align: u32,

    /// Reserved word of `fat_arch_64`; zero for `fat_arch`.
    ///
    /// Carried through unchanged when the descriptor is re-emitted.
    pub reserved: u32,
}

impl SliceDescriptor {
    pub fn from_reader<R: io::Read>(variant: FatVariant, cur: &mut R) -> io::Result<Self> {
        let cputype = cur.read_u32::<FatOrder>()?;
        let cpusubtype = cur.read_u32::<FatOrder>()?;

        Ok(match variant {
            FatVariant::Fat32 => SliceDescriptor {
                cputype,
                cpusubtype,
                offset: u64::from(cur.read_u32::<FatOrder>()?),
                size: u64::from(cur.read_u32::<FatOrder>()?),
                align: cur.read_u32::<FatOrder>()?,
                reserved: 0,
            },
            FatVariant::Fat64 => SliceDescriptor {
                cputype,
                cpusubtype,
                offset: cur.read_u64::<FatOrder>()?,
                size: cur.read_u64::<FatOrder>()?,
                align: cur.read_u32::<FatOrder>()?,
                reserved: cur.read_u32::<FatOrder>()?,
            },
        })
    }

    /// Encodes the record in the layout of `variant`.
    ///
    /// Fails with `InvalidData` if a 32-bit record cannot hold the offset or size.
    pub fn write_to<W: io::Write>(&self, variant: FatVariant, out: &mut W) -> io::Result<()> {
        out.write_u32::<FatOrder>(self.cputype)?;
        out.write_u32::<FatOrder>(self.cpusubtype)?;

        match variant {
            FatVariant::Fat32 => {
                out.write_u32::<FatOrder>(narrow(self.offset, "offset")?)?;
                out.write_u32::<FatOrder>(narrow(self.size, "size")?)?;
                out.write_u32::<FatOrder>(self.align)
            }
            FatVariant::Fat64 => {
                out.write_u64::<FatOrder>(self.offset)?;
                out.write_u64::<FatOrder>(self.size)?;
                out.write_u32::<FatOrder>(self.align)?;
                out.write_u32::<FatOrder>(self.reserved)
            }
        }
    }

    /// Required alignment in bytes. Only meaningful once `align` is validated.
    pub fn alignment(&self) -> u64 {
        1u64 << self.align
    }

    /// One past the last byte of the slice, or `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }

    pub fn arch(&self) -> ArchitectureId {
        ArchitectureId::exact(self.cputype, self.cpusubtype)
    }
}

fn narrow(value: u64, field: &str) -> io::Result<u32> {
    u32::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{field} {value:#x} does not fit a 32-bit fat_arch record"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn descriptor() -> SliceDescriptor {
        SliceDescriptor {
            cputype: 0x0100_0007,
            cpusubtype: 3,
            offset: 0x4000,
            size: 0x1234,
            align: 14,
            reserved: 0,
        }
    }

    #[test]
    fn test_fat32_record_layout() {
        let mut buf = Vec::new();
        descriptor().write_to(FatVariant::Fat32, &mut buf).unwrap();
        assert_eq!(
            buf,
            [
                0x01, 0x00, 0x00, 0x07, // cputype
                0x00, 0x00, 0x00, 0x03, // cpusubtype
                0x00, 0x00, 0x40, 0x00, // offset
                0x00, 0x00, 0x12, 0x34, // size
                0x00, 0x00, 0x00, 0x0e, // align
            ]
        );
    }

    #[test]
    fn test_fat64_record_keeps_reserved_word() {
        let mut d = descriptor();
        d.offset = 0x1_0000_0000;
        d.reserved = 0xdead_beef;

        let mut buf = Vec::new();
        d.write_to(FatVariant::Fat64, &mut buf).unwrap();
        assert_eq!(buf.len() as u64, FatVariant::Fat64.record_size());

        let decoded = SliceDescriptor::from_reader(FatVariant::Fat64, &mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, d);
    }

    #[test]
    fn test_fat32_rejects_wide_offset() {
        let mut d = descriptor();
        d.offset = 0x1_0000_0000;
        let err = d.write_to(FatVariant::Fat32, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
