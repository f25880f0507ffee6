use bulkloader::io::compression::{CompressionCodec, codec_by_name, open_reader, register_codec};
use bulkloader::testing::*;
use bulkloader::{SegmentReader, TableWriter};
use std::io::{Cursor, Read};
use std::sync::Arc;

/// XORs every byte; enough to prove data passes through a registered codec.
struct Scramble;

impl CompressionCodec for Scramble {
    fn name(&self) -> &str {
        "scramble"
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        None
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        Ok(data.iter().map(|b| b ^ 0x5a).collect())
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        let mut raw = Vec::new();
        let mut reader = reader;
        reader.read_to_end(&mut raw)?;
        Ok(Box::new(Cursor::new(
            raw.into_iter().map(|b| b ^ 0x5a).collect::<Vec<_>>(),
        )))
    }
}

#[test]
fn registered_codec_is_used_for_segment_data() {
    register_codec(Arc::new(Scramble));
    assert_eq!(codec_by_name("SCRAMBLE").unwrap().name(), "scramble");

    let dir = TempDirPath::new().unwrap();
    let spec = sample_spec(dir.path()).unwrap().with_compression("scramble");
    let report = TableWriter::new(spec, SAMPLE_INSERT)
        .unwrap()
        .generate(sample_rows(7))
        .unwrap();

    let reader = SegmentReader::new(&report.directory, SAMPLE_KEYSPACE, SAMPLE_TABLE);
    assert_eq!(
        reader.statistics(1).unwrap().compression.as_deref(),
        Some("scramble")
    );
    assert_eq!(reader.read_all().unwrap().len(), 7);
}

#[test]
fn unknown_codec_fails_writer_construction() {
    let dir = TempDirPath::new().unwrap();
    let spec = sample_spec(dir.path()).unwrap().with_compression("snappy");
    assert!(TableWriter::new(spec, SAMPLE_INSERT).is_err());
}

#[cfg(feature = "compression-bzip2")]
#[test]
fn bzip2_stream_is_sniffed_without_a_name() {
    let packed = codec_by_name("bzip2").unwrap().compress(b"abcabcabc").unwrap();
    let mut out = String::new();
    open_reader(Cursor::new(packed), None)
        .unwrap()
        .read_to_string(&mut out)
        .unwrap();
    assert_eq!(out, "abcabcabc");
}

#[cfg(feature = "compression-xz")]
#[test]
fn xz_round_trips_by_name() {
    let codec = codec_by_name("xz").unwrap();
    let packed = codec.compress(&[1, 2, 3, 4]).unwrap();
    let mut out = Vec::new();
    open_reader(Cursor::new(packed), Some("xz"))
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, vec![1, 2, 3, 4]);
}
