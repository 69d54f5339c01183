//! End-to-end checks of parse -> select -> write -> verify on synthetic
//! universal binaries.

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use fatslim_core::{
    parse, remove, trim, verify, write, ArchitectureId, Error, FatVariant, FormatError,
    MissingPolicy, SelectionError, SingleSlicePolicy, SliceDescriptor, TrimRequest,
};
use goblin::mach::cputype::{CPU_TYPE_ARM64, CPU_TYPE_I386, CPU_TYPE_X86_64};
use goblin::mach::header::{MH_MAGIC, MH_MAGIC_64};

struct Entry {
    cputype: u32,
    cpusubtype: u32,
    offset: u64,
    align: u32,
    image: Vec<u8>,
}

/// A thin Mach-O image of `len` bytes whose body is filled with `fill`.
fn image(cputype: u32, cpusubtype: u32, len: usize, fill: u8) -> Vec<u8> {
    let magic = if cputype == CPU_TYPE_I386 { MH_MAGIC } else { MH_MAGIC_64 };
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(magic).unwrap();
    buf.write_u32::<LittleEndian>(cputype).unwrap();
    buf.write_u32::<LittleEndian>(cpusubtype).unwrap();
    buf.resize(len, fill);
    buf
}

fn entry(cputype: u32, cpusubtype: u32, offset: u64, len: usize, align: u32, fill: u8) -> Entry {
    Entry {
        cputype,
        cpusubtype,
        offset,
        align,
        image: image(cputype, cpusubtype, len, fill),
    }
}

fn build(variant: FatVariant, entries: &[Entry]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<BigEndian>(variant.magic()).unwrap();
    buf.write_u32::<BigEndian>(entries.len() as u32).unwrap();
    for e in entries {
        SliceDescriptor {
            cputype: e.cputype,
            cpusubtype: e.cpusubtype,
            offset: e.offset,
            size: e.image.len() as u64,
            align: e.align,
            reserved: 0,
        }
        .write_to(variant, &mut buf)
        .unwrap();
    }
    for e in entries {
        let start = e.offset as usize;
        if buf.len() < start {
            buf.resize(start, 0);
        }
        buf.extend_from_slice(&e.image);
    }
    buf
}

fn x86_64() -> ArchitectureId {
    "x86_64".parse().unwrap()
}

fn arm64() -> ArchitectureId {
    "arm64".parse().unwrap()
}

fn i386() -> ArchitectureId {
    "i386".parse().unwrap()
}

fn three_slices(variant: FatVariant) -> Vec<u8> {
    build(
        variant,
        &[
            entry(CPU_TYPE_I386, 3, 0x1000, 0x1234, 12, 0xa1),
            entry(CPU_TYPE_X86_64, 3, 0x4000, 0x2345, 14, 0xb2),
            entry(CPU_TYPE_ARM64, 0, 0x8000, 0x3456, 14, 0xc3),
        ],
    )
}

#[test]
fn round_trip_without_removal_is_identical() {
    for variant in [FatVariant::Fat32, FatVariant::Fat64] {
        let bytes = three_slices(variant);
        let binary = parse(&bytes).unwrap();

        let out = write(binary.variant(), binary.slices(), SingleSlicePolicy::Unwrap).unwrap();
        verify(&out).unwrap();
        assert_eq!(out.bytes(), &bytes[..], "{variant:?}");
    }
}

#[test]
fn round_trip_rezeroes_gap_bytes() {
    let mut bytes = three_slices(FatVariant::Fat32);
    // Junk between the first and second slice.
    bytes[0x3000..0x3010].fill(0xee);

    let binary = parse(&bytes).unwrap();
    let out = write(binary.variant(), binary.slices(), SingleSlicePolicy::Unwrap).unwrap();

    assert_eq!(out.len(), bytes.len());
    assert!(out.bytes()[0x3000..0x3010].iter().all(|&b| b == 0));
    assert_eq!(out.bytes()[..0x3000], bytes[..0x3000]);
    assert_eq!(out.bytes()[0x3010..], bytes[0x3010..]);
}

#[test]
fn removing_each_slice_keeps_the_others_exactly() {
    let bytes = three_slices(FatVariant::Fat32);
    let original = parse(&bytes).unwrap();

    for target in [i386(), x86_64(), arm64()] {
        let trimmed = trim(&bytes, &TrimRequest::new([target])).unwrap();
        assert!(trimmed.output.is_wrapped());

        let result = parse(trimmed.output.bytes()).unwrap();
        let expected: Vec<_> = original
            .slices()
            .iter()
            .filter(|s| s.arch() != target)
            .collect();

        assert_eq!(result.slices().len(), 2);
        for (got, want) in result.slices().iter().zip(expected) {
            assert_eq!(got.arch(), want.arch());
            assert_eq!(got.data(), want.data());
            assert_eq!(got.descriptor().align, want.descriptor().align);
            assert_eq!(got.descriptor().offset % got.descriptor().alignment(), 0);
        }
        assert_eq!(trimmed.report.removed, vec![target]);
    }
}

#[test]
fn removing_the_middle_slice_realigns_the_last() {
    // A, B, C; remove B. C must move up to the first 2^14 boundary after A.
    let bytes = three_slices(FatVariant::Fat32);
    let trimmed = trim(&bytes, &TrimRequest::new([x86_64()])).unwrap();
    let result = parse(trimmed.output.bytes()).unwrap();

    let a = result.slices()[0].descriptor();
    let c = result.slices()[1].descriptor();
    assert_eq!(result.slices()[0].arch(), i386());
    assert_eq!(result.slices()[1].arch(), arm64());
    assert_eq!(a.offset, 0x1000);
    assert!(c.offset >= a.offset + a.size);
    assert_eq!(c.offset, 0x4000);
    assert_eq!(c.offset % (1 << 14), 0);
}

#[test]
fn offsets_are_realigned_even_when_unchanged() {
    let bytes = three_slices(FatVariant::Fat64);
    let trimmed = trim(&bytes, &TrimRequest::new([arm64()])).unwrap();
    let result = parse(trimmed.output.bytes()).unwrap();

    // Neither remaining slice needed to move.
    assert_eq!(result.slices()[0].descriptor().offset, 0x1000);
    assert_eq!(result.slices()[1].descriptor().offset, 0x4000);
    for slice in result.slices() {
        let d = slice.descriptor();
        assert_eq!(d.offset % d.alignment(), 0);
    }
}

#[test]
fn two_slice_example_unwraps_to_bare_binary() {
    // 12288 is not a multiple of 2^14, so B declares 2^12 here; the 2^14
    // layout is in the next test.
    let bytes = build(
        FatVariant::Fat32,
        &[
            entry(CPU_TYPE_X86_64, 3, 4096, 8192, 12, 0x11),
            entry(CPU_TYPE_ARM64, 0, 12288, 4096, 12, 0x22),
        ],
    );

    let trimmed = trim(&bytes, &TrimRequest::new([x86_64()])).unwrap();
    assert!(!trimmed.output.is_wrapped());
    assert_eq!(trimmed.output.len(), 4096);
    assert_eq!(trimmed.output.bytes(), &bytes[12288..16384]);
    assert_eq!(LittleEndian::read_u32(&trimmed.output.bytes()[..4]), MH_MAGIC_64);
    assert_eq!(LittleEndian::read_u32(&trimmed.output.bytes()[4..8]), CPU_TYPE_ARM64);
}

#[test]
fn two_slice_example_with_page_alignment() {
    let bytes = build(
        FatVariant::Fat32,
        &[
            entry(CPU_TYPE_X86_64, 3, 4096, 8192, 12, 0x11),
            entry(CPU_TYPE_ARM64, 0, 16384, 4096, 14, 0x22),
        ],
    );

    let trimmed = trim(&bytes, &TrimRequest::new([x86_64()])).unwrap();
    assert_eq!(trimmed.output.bytes(), &bytes[16384..]);
    assert_eq!(trimmed.report.saved(), 16384);
}

#[test]
fn single_remaining_slice_can_stay_wrapped() {
    let bytes = three_slices(FatVariant::Fat32);
    let request = TrimRequest::new([i386(), x86_64()]).keep_wrapped();

    let trimmed = trim(&bytes, &request).unwrap();
    assert!(trimmed.output.is_wrapped());
    let result = parse(trimmed.output.bytes()).unwrap();
    assert_eq!(result.archs(), vec![arm64()]);
    assert_eq!(result.slices()[0].data(), &bytes[0x8000..]);
}

#[test]
fn last_slice_guard() {
    let single = build(FatVariant::Fat32, &[entry(CPU_TYPE_ARM64, 0, 0x4000, 0x100, 14, 0)]);
    let err = trim(&single, &TrimRequest::new([arm64()])).unwrap_err();
    assert!(matches!(err, Error::Selection(SelectionError::WouldRemoveLastSlice)));

    let bytes = three_slices(FatVariant::Fat32);
    let err = trim(&bytes, &TrimRequest::new([i386(), x86_64(), arm64()])).unwrap_err();
    assert!(matches!(err, Error::Selection(SelectionError::WouldRemoveLastSlice)));
    assert_eq!(err.exit_code(), 4);

    let err = trim(&bytes, &TrimRequest::new([ArchitectureId::Family(CPU_TYPE_ARM64), i386(), x86_64()]))
        .unwrap_err();
    assert!(matches!(err, Error::Selection(SelectionError::WouldRemoveLastSlice)));
}

#[test]
fn missing_target_guard() {
    let bytes = build(
        FatVariant::Fat32,
        &[
            entry(CPU_TYPE_X86_64, 3, 0x4000, 0x100, 14, 0),
            entry(CPU_TYPE_ARM64, 0, 0x8000, 0x100, 14, 0),
        ],
    );

    let err = trim(&bytes, &TrimRequest::new([i386()])).unwrap_err();
    assert!(matches!(
        err,
        Error::Selection(SelectionError::ArchitectureNotFound { id }) if id == i386()
    ));

    // arm64e is a different subtype from arm64
    let arm64e = ArchitectureId::exact(CPU_TYPE_ARM64, 2);
    let binary = parse(&bytes).unwrap();
    assert_eq!(
        remove(&binary, &[arm64e], MissingPolicy::Strict).unwrap_err(),
        SelectionError::ArchitectureNotFound { id: arm64e }
    );

    let trimmed = trim(&bytes, &TrimRequest::new([i386(), x86_64()]).lenient()).unwrap();
    assert_eq!(trimmed.report.removed, vec![x86_64()]);
}

#[test]
fn malformed_inputs_are_rejected_before_any_output() {
    let thin = image(CPU_TYPE_ARM64, 0, 0x100, 0);
    assert!(matches!(
        trim(&thin, &TrimRequest::new([x86_64()])).unwrap_err(),
        Error::Format(FormatError::BadMagic { .. })
    ));

    let mut bytes = three_slices(FatVariant::Fat32);
    bytes.truncate(0x8000 + 0x100);
    let err = trim(&bytes, &TrimRequest::new([x86_64()])).unwrap_err();
    assert!(matches!(err, Error::Format(FormatError::InvalidSlice { index: 2, .. })));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn output_is_reproducible() {
    let bytes = three_slices(FatVariant::Fat64);
    let request = TrimRequest::new([i386()]);
    let first = trim(&bytes, &request).unwrap();
    let second = trim(&bytes, &request).unwrap();
    assert_eq!(first.output.bytes(), second.output.bytes());
}
