//! End-to-end scan, verify and patch runs over a synthetic firmware image.

use efipatch_core::checksum::{crc32, encode_checksum};
use efipatch_core::patch::{CODE_LEN, SERIAL_LEN};
use efipatch_core::scanner::{find, signature};
use efipatch_core::{
    apply_patches, scan_file, verify_checksum, write_image, Error, MeHeaderVersion, PatchKind,
    PatchRequest, PatchStatus, Scanner, Severity,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const SERIAL: &[u8] = b"C02OLDSERIAL";
const ME_OFFSET: usize = 0x20;
const NVRAM_OFFSET: usize = 0x100;
const FSYS_OFFSET: usize = 0x200;
const LOCK_OFFSET: usize = 0x300;

/// Builds an image with an ME header, NVRAM store, `Fsys` block and lock store.
/// The checksum is valid unless `corrupt` is set.
fn build_image(corrupt: bool) -> Vec<u8> {
    let mut image = vec![0xC3; 0x400];

    image[ME_OFFSET..ME_OFFSET + 20].copy_from_slice(signature::ME_HEADERS[0].1);

    image[NVRAM_OFFSET..NVRAM_OFFSET + 4].copy_from_slice(b"$VSS");
    image[NVRAM_OFFSET + 0x80..NVRAM_OFFSET + 0x84].copy_from_slice(b"$VSS");

    let mut fsys = b"Fsys\x78\x56\x34\x12".to_vec();
    fsys.extend_from_slice(b"SSN\x0c\x00");
    fsys.extend_from_slice(SERIAL);
    fsys.extend_from_slice(b"ssn\x0c\x00");
    fsys.extend_from_slice(SERIAL);
    fsys.extend_from_slice(b"HWC\x04\x00RIAL");
    fsys.extend_from_slice(b"hwc\x04\x00RIAL");
    fsys.extend_from_slice(b"son\x09\x00MLL42LL/A");
    fsys.extend_from_slice(b"EOF");
    fsys.extend_from_slice(&[0; 7]);
    let checksum_offset = FSYS_OFFSET + fsys.len();
    image[FSYS_OFFSET..checksum_offset].copy_from_slice(&fsys);

    let mut stored = encode_checksum(crc32(&fsys)).unwrap();
    // The zero-padding heuristic cannot see a field starting with 0x00
    assert_ne!(stored[0], 0, "fixture checksum starts with a zero byte");
    if corrupt {
        stored[3] ^= 0xFF;
    }
    image[checksum_offset..checksum_offset + 4].copy_from_slice(&stored);

    image[LOCK_OFFSET..LOCK_OFFSET + 4].copy_from_slice(b"$SVS");
    image[LOCK_OFFSET + 0x40..LOCK_OFFSET + 0x44].copy_from_slice(b"$SVS");

    image
}

#[test]
fn scan_locates_every_region() {
    let image = build_image(false);
    let model = Scanner::new().scan(&image).unwrap();

    assert_eq!(model.me.start(), Some(ME_OFFSET));
    assert_eq!(model.me_version, Some(MeHeaderVersion::V1));
    assert_eq!(model.nvram.span(), Some(NVRAM_OFFSET..NVRAM_OFFSET + 0x80));
    assert_eq!(model.lock.span(), Some(LOCK_OFFSET..LOCK_OFFSET + 0x40));

    let block = &model.data_block;
    assert_eq!(block.start(), FSYS_OFFSET);
    assert_eq!(block.serial_upper().unwrap().as_str(), "C02OLDSERIAL");
    assert_eq!(block.serial_lower().unwrap().as_str(), "C02OLDSERIAL");
    assert_eq!(block.hardware_code().as_deref(), Some("RIAL"));
    assert_eq!(block.model().unwrap().as_str(), "MLL42LL/A");
    assert_eq!(block.checksum().offset, block.end() + 3 + 7);
    assert_eq!(block.serial_upper().unwrap().value.len(), SERIAL_LEN);
    assert_eq!(block.code_lower().unwrap().value.len(), CODE_LEN);
}

#[test]
fn verify_reports_match_for_valid_checksum() {
    let image = build_image(false);
    let model = Scanner::new().scan(&image).unwrap();
    let report = verify_checksum(&image, &model).unwrap();

    assert!(report.matches);
    assert_eq!(report.stored, encode_checksum(report.computed).unwrap());
    assert_eq!(report.stored_value().unwrap(), report.computed);
    assert!(report.mismatch().is_none());
}

#[test]
fn verify_mismatch_is_advisory() {
    let image = build_image(true);
    let model = Scanner::new().scan(&image).unwrap();
    let report = verify_checksum(&image, &model).unwrap();

    assert!(!report.matches);
    let err = report.mismatch().unwrap();
    assert_eq!(err.severity(), Severity::Advisory);

    // Patching still proceeds and leaves a valid checksum behind
    let patched = apply_patches(&image, &model, &PatchRequest::new().serial("C02NEWSRJGH5"));
    assert!(verify_checksum(&patched.image, &model).unwrap().matches);
}

#[test]
fn scan_without_data_block_is_fatal() {
    let mut image = build_image(false);
    image[FSYS_OFFSET..FSYS_OFFSET + 4].copy_from_slice(b"XXXX");

    let err = Scanner::new().scan(&image).unwrap_err();
    assert!(matches!(err, Error::DataBlockNotFound));
    assert_eq!(err.severity(), Severity::Fatal);
}

#[test]
fn short_serial_leaves_data_block_untouched() {
    let image = build_image(false);
    let model = Scanner::new().scan(&image).unwrap();
    let report = apply_patches(&image, &model, &PatchRequest::new().serial("C02NEWSERIA"));

    let outcome = report.outcome(PatchKind::Serial).unwrap();
    assert!(matches!(
        outcome.status,
        PatchStatus::Skipped(Error::SerialLength { length: 11 })
    ));
    assert_eq!(report.image, image);
}

#[test]
fn clear_nvram_fills_after_header() {
    let image = build_image(false);
    let model = Scanner::new().scan(&image).unwrap();
    let report = apply_patches(&image, &model, &PatchRequest::new().clear_nvram(true));

    let fill_start = NVRAM_OFFSET + signature::STORE_HEADER_LEN;
    let fill_end = NVRAM_OFFSET + 0x80;
    assert!(report.image[fill_start..fill_end].iter().all(|&b| b == 0xFF));
    assert_eq!(&report.image[..fill_start], &image[..fill_start]);
    assert_eq!(&report.image[fill_end..], &image[fill_end..]);
}

#[test]
fn full_run_composes_all_patches() {
    let image = build_image(false);
    let model = Scanner::new().scan(&image).unwrap();
    let me_block = vec![0x4D; 0x40];
    let request = PatchRequest::new()
        .serial("c02newsrjgh5")
        .insert_block(me_block.clone())
        .clear_nvram(true)
        .remove_lock(true);

    let report = apply_patches(&image, &model, &request);
    assert_eq!(report.applied_count(), 5);
    assert_eq!(report.skipped().count(), 0);
    assert_eq!(report.image.len(), image.len());

    let out = &report.image;
    assert_eq!(&out[ME_OFFSET..ME_OFFSET + 0x40], &me_block[..]);
    assert!(out[LOCK_OFFSET + 16..LOCK_OFFSET + 0x40].iter().all(|&b| b == 0xFF));
    assert_eq!(&out[LOCK_OFFSET..LOCK_OFFSET + 16], &image[LOCK_OFFSET..LOCK_OFFSET + 16]);

    let block = model.data_block.checksummed_range();
    assert_eq!(find(&out[block.clone()], SERIAL), None);
    assert_eq!(find(&out[block.clone()], b"RIAL"), None);
    assert!(find(&out[block], b"C02NEWSRJGH5").is_some());
    assert!(verify_checksum(out, &model).unwrap().matches);

    // Untouched gap between the ME block and NVRAM
    assert_eq!(&out[ME_OFFSET + 0x40..NVRAM_OFFSET], &image[ME_OFFSET + 0x40..NVRAM_OFFSET]);
}

#[test]
fn lock_removal_without_markers_only_skips_itself() {
    let mut image = build_image(false);
    image[LOCK_OFFSET + 0x40..LOCK_OFFSET + 0x44].copy_from_slice(b"....");
    let model = Scanner::new().scan(&image).unwrap();

    let request = PatchRequest::new().serial("C02NEWSRJGH5").remove_lock(true);
    let report = apply_patches(&image, &model, &request);

    assert!(report.outcome(PatchKind::Serial).unwrap().is_applied());
    assert!(report.outcome(PatchKind::Checksum).unwrap().is_applied());
    let lock = report.outcome(PatchKind::RemoveLock).unwrap();
    assert_eq!(lock.error().map(Error::severity), Some(Severity::Skipped));
}

#[test]
fn write_and_rescan_round_trip() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bin");
    let output = dir.path().join("output.bin");
    std::fs::write(&input, build_image(false)).unwrap();

    let (image, model) = scan_file(&input).unwrap();
    let report = apply_patches(&image, &model, &PatchRequest::new().serial("C02NEWSRJGH5"));
    write_image(&output, &report.image).unwrap();

    let (written, rescanned) = scan_file(&output).unwrap();
    assert_eq!(written, report.image);
    assert_eq!(
        rescanned.data_block.serial_upper().unwrap().as_str(),
        "C02NEWSRJGH5"
    );
    assert_eq!(rescanned.data_block.code_lower().unwrap().as_str(), "JGH5");
}

#[test]
fn serial_patch_survives_nvram_store_enclosing_data_block() {
    let mut image = vec![0xC3; 0x200];
    image[0x10..0x14].copy_from_slice(b"$VSS");
    image[0x100..0x104].copy_from_slice(b"$VSS");

    let mut fsys = b"Fsys\x00\x00\x00\x00".to_vec();
    fsys.extend_from_slice(b"SSN\x0c\x00");
    fsys.extend_from_slice(SERIAL);
    fsys.extend_from_slice(b"hwc\x04\x00RIAL");
    fsys.extend_from_slice(b"EOF\x00\x00\x00");
    let fsys_offset = 0x40;
    let checksum_offset = fsys_offset + fsys.len();
    image[fsys_offset..checksum_offset].copy_from_slice(&fsys);
    image[checksum_offset..checksum_offset + 4].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);

    let model = Scanner::new().scan(&image).unwrap();
    assert_eq!(model.nvram.span(), Some(0x10..0x100));
    assert_eq!(model.data_block.start(), fsys_offset);

    let request = PatchRequest::new().clear_nvram(true).serial("C02NEWSRJGH5");
    let report = apply_patches(&image, &model, &request);

    assert!(report.outcome(PatchKind::ClearNvram).unwrap().is_applied());
    assert!(report.outcome(PatchKind::Serial).unwrap().is_applied());
    assert!(report.outcome(PatchKind::Checksum).unwrap().is_applied());

    let out = &report.image;
    let block = model.data_block.checksummed_range();
    assert_eq!(&out[fsys_offset..fsys_offset + 4], b"Fsys");
    assert!(find(&out[block.clone()], b"C02NEWSRJGH5").is_some());
    assert!(find(&out[block], b"hwc\x04\x00JGH5").is_some());
    assert!(verify_checksum(out, &model).unwrap().matches);

    // Erased around the block, header kept
    assert_eq!(&out[0x10..0x20], &image[0x10..0x20]);
    assert!(out[0x20..fsys_offset].iter().all(|&b| b == 0xFF));
    assert!(out[checksum_offset + 4..0x100].iter().all(|&b| b == 0xFF));
    assert_eq!(&out[0x100..], &image[0x100..]);
}
