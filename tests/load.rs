use debug_bridge::{
    elf::{load_elf, load_elf_data, ElfImage, ZERO_FILL_BLOCK},
    error::Error,
    flasher::DefaultProgressCallback,
    transport::{DummyCable, MemoryTransport},
};
use pretty_assertions::assert_eq;

mod common;

use common::{ElfBuilder, Op, Recorder};

#[test]
fn segment_with_zero_fill() {
    let data: Vec<u8> = (1..=0x10).collect();
    let elf = ElfBuilder::new().load(0x1000, &data, 0x20).build();

    let (mut cable, log) = Recorder::new(DummyCable::new());
    load_elf_data(&elf, &mut cable, &mut DefaultProgressCallback).unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            Op::Write {
                addr: 0x1000,
                data: data.clone(),
            },
            Op::Write {
                addr: 0x1010,
                data: vec![0; 0x10],
            },
        ]
    );
}

#[test]
fn loaded_memory_matches_segments() {
    let text = [0x13, 0x05, 0x10, 0x00, 0x73, 0x00, 0x10, 0x00];
    let data = [0xaa; 12];
    let elf = ElfBuilder::new()
        .entry(0x1c00_8080)
        .load(0x1c00_8080, &text, text.len() as u32)
        .note(b"ignored")
        .load(0x1c01_0000, &data, 0x40)
        .build();

    let mut cable = DummyCable::new();
    // Stale content that the zero-fill must clear
    cable.write(0x1c01_0000, &[0x55; 0x80]).unwrap();

    load_elf_data(&elf, &mut cable, &mut DefaultProgressCallback).unwrap();

    assert_eq!(cable.peek(0x1c00_8080, text.len()), text);
    assert_eq!(cable.peek(0x1c01_0000, 12), data);
    assert_eq!(cable.peek(0x1c01_000c, 0x40 - 12), vec![0; 0x40 - 12]);
    assert_eq!(cable.peek(0x1c01_0040, 4), [0x55; 4]);
}

#[test]
fn only_load_segments_are_parsed() {
    let elf = ElfBuilder::new()
        .entry(0x8000_0000)
        .note(b"build-id")
        .load(0x8000_0000, &[1, 2, 3, 4], 4)
        .load(0x8000_1000, &[], 0x100)
        .build();

    let image = ElfImage::parse(&elf).unwrap();
    let segments = image.segments();

    assert_eq!(image.entry(), 0x8000_0000);
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].zero_fill(), None);
    assert_eq!(segments[1].data, &[] as &[u8]);
    assert_eq!(segments[1].zero_fill(), Some((0x8000_1000, 0x100)));
}

#[test]
fn bss_only_segment_skips_data_write() {
    let elf = ElfBuilder::new().load(0x2000, &[], 8).build();

    let (mut cable, log) = Recorder::new(DummyCable::new());
    load_elf_data(&elf, &mut cable, &mut DefaultProgressCallback).unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![Op::Write {
            addr: 0x2000,
            data: vec![0; 8],
        }]
    );
}

#[test]
fn load_from_file() {
    let path = ElfBuilder::new()
        .load(0x3000, b"hello", 8)
        .write("load_from_file.elf");

    let mut cable = DummyCable::new();
    load_elf(&path, &mut cable, &mut DefaultProgressCallback).unwrap();

    assert_eq!(cable.peek(0x3000, 8), b"hello\0\0\0");
}

#[test]
fn missing_or_broken_binaries_fail() {
    let mut cable = DummyCable::new();

    assert!(matches!(
        load_elf(
            std::path::Path::new("/nonexistent/app.elf"),
            &mut cable,
            &mut DefaultProgressCallback
        ),
        Err(Error::FileOpenError(..))
    ));

    assert!(matches!(
        load_elf_data(b"\x7fELF garbage", &mut cable, &mut DefaultProgressCallback),
        Err(Error::InvalidElf(_))
    ));
}

#[test]
fn elf64_segments_are_loaded() {
    let elf = ElfBuilder::new()
        .elf64()
        .entry(0x8000_0000)
        .load_at(0x1_0000_0000, &[0xde, 0xad, 0xbe, 0xef], 8)
        .build();

    let image = ElfImage::parse(&elf).unwrap();
    assert_eq!(image.entry(), 0x8000_0000);
    assert_eq!(image.segments()[0].addr, 0x1_0000_0000);

    let mut cable = DummyCable::new();
    load_elf_data(&elf, &mut cable, &mut DefaultProgressCallback).unwrap();

    assert_eq!(
        cable.peek(0x1_0000_0000, 8),
        [0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0]
    );
}

#[test]
fn segment_past_the_address_space_is_rejected() {
    let elf = ElfBuilder::new()
        .elf64()
        .load_at(u64::MAX - 0xf, &[1; 4], 0x100)
        .build();

    let mut cable = DummyCable::new();
    assert!(matches!(
        load_elf_data(&elf, &mut cable, &mut DefaultProgressCallback),
        Err(Error::InvalidElf(_))
    ));
}

#[test]
fn large_zero_fill_is_written_in_blocks() {
    let mem_size = 2 * ZERO_FILL_BLOCK + 0x100;
    let elf = ElfBuilder::new()
        .load(0x4000, &[7; 4], mem_size as u32)
        .build();

    let (mut cable, log) = Recorder::new(DummyCable::new());
    load_elf_data(&elf, &mut cable, &mut DefaultProgressCallback).unwrap();

    let writes: Vec<(u64, usize)> = log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|op| match op {
            Op::Write { addr, data } if data.iter().all(|b| *b == 0) => Some((*addr, data.len())),
            _ => None,
        })
        .collect();

    assert_eq!(
        writes,
        vec![
            (0x4004, ZERO_FILL_BLOCK),
            (0x4004 + ZERO_FILL_BLOCK as u64, ZERO_FILL_BLOCK),
            (0x4004 + 2 * ZERO_FILL_BLOCK as u64, 0xfc),
        ]
    );
}
