use super::*;
use anyhow::Result;
use async_trait::async_trait;
use std::rc::Rc;

#[static_init::dynamic]
static INIT_LOGGER: () = {
    tracing_subscriber::fmt::fmt()
        .compact()
        .with_max_level(tracing_subscriber::filter::LevelFilter::TRACE)
        .with_test_writer()
        .without_time()
        .with_ansi(false)
        .init();
};

fn counting_bytes(n: usize) -> Vec<u8> {
    (0..n).map(|i| i as u8).collect()
}

fn paged(data: Vec<u8>, chunk_size: u64) -> (Rc<BufferLoader>, PagedReader) {
    let loader = Rc::new(BufferLoader::new(data));
    let reader = PagedReader::with_chunk_size(loader.clone(), chunk_size).unwrap();
    (loader, reader)
}

#[test]
fn location_display() {
    assert_eq!(Location::at_file_offset(0x1f).to_string(), "file offset 0x1f");

    let in_stream = Location {
        file_offset: Some(0x2004),
        stream: Some((StreamId::Index(3), 0x4)),
    };
    assert_eq!(
        in_stream.to_string(),
        "stream #3 offset 0x4 (file offset 0x2004)"
    );

    let in_directory = Location {
        file_offset: Some(0x400),
        stream: Some((StreamId::Directory, 0)),
    };
    assert_eq!(
        in_directory.to_string(),
        "stream directory offset 0x0 (file offset 0x400)"
    );
}

#[test]
fn guid_formatting() {
    #[rustfmt::skip]
    let bytes: [u8; 16] = [
        0xd6, 0x82, 0x51, 0x01,     // data1, little-endian
        0xe2, 0x09,                 // data2
        0x90, 0x45,                 // data3
        0x89, 0xe2, 0x5a, 0xbf, 0x55, 0xea, 0x3c, 0x33,
    ];
    assert_eq!(
        Guid::from_bytes_le(&bytes).to_string(),
        "015182d6-09e2-4590-89e2-5abf55ea3c33"
    );
    assert_eq!(Guid::from_bytes_le(&bytes).0.to_bytes_le(), bytes);

    let zero = Guid::from_bytes_le(&[0; 16]);
    assert_eq!(zero.to_string(), "00000000-0000-0000-0000-000000000000");
    assert_eq!(zero, Guid::default());
    assert_eq!(zero.0.to_bytes_le(), [0; 16]);
}

#[test]
fn slice_reader_primitives() {
    let data = [0x01, 0x02, 0x03, 0x04, 0x05, b'h', b'i', 0, b'x'];
    let r = SliceReader::new(&data);
    assert_eq!(r.size(), 9);
    assert_eq!(r.u8(4).unwrap(), 5);
    assert_eq!(r.u16(0).unwrap(), 0x0201);
    assert_eq!(r.u32(1).unwrap(), 0x05040302);
    assert_eq!(r.read_utf8_c_string(5).unwrap(), "hi");
    assert_eq!(r.read_utf8_fixed(5, 4).unwrap(), "hi");
    assert_eq!(r.read_utf8(5, 2).unwrap(), "hi");
    assert_eq!(r.find_byte(0, 0, None).unwrap(), Some(7));
    assert_eq!(r.find_byte(0, 0, Some(7)).unwrap(), None);

    assert!(matches!(
        r.u32(6),
        Err(ReadError::OutOfBounds { offset: 6, len: 4, size: 9, .. })
    ));
    assert!(matches!(
        r.read_utf8_c_string(8),
        Err(ReadError::MissingNulTerminator { .. })
    ));
}

#[test]
fn sub_view_clamps_to_parent() {
    let data = counting_bytes(16);
    let r = SliceReader::new(&data);
    assert_eq!(r.sub_view(10, Some(100)).size(), 6);
    assert_eq!(r.sub_view(10, None).size(), 6);
    assert_eq!(r.sub_view(20, Some(4)).size(), 0);

    let sub = r.sub_view(4, Some(8));
    assert_eq!(sub.u8(0).unwrap(), 4);
    assert!(sub.u32(6).is_err());
    assert_eq!(sub.locate(2), Location::at_file_offset(6));
}

#[test]
fn nested_sub_views_collapse() {
    let data = counting_bytes(64);
    let r = BufferReader::new(data);
    for (a, la, b, lb) in [(0, 64, 0, 64), (3, 40, 5, 10), (10, 20, 19, 5), (8, 8, 8, 8)] {
        let nested = r.sub_view(a, Some(la)).sub_view(b, Some(lb));
        let direct = r.sub_view(a + b, Some(lb.min(la.saturating_sub(b))));
        assert_eq!(nested.base_offset(), direct.base_offset());
        assert_eq!(nested.size(), direct.size());
        assert_eq!(
            nested.copy_bytes(0, nested.size()).unwrap(),
            direct.copy_bytes(0, direct.size()).unwrap()
        );
    }
}

#[tokio::test]
async fn buffer_loader_clamps_to_size() -> Result<()> {
    let loader = BufferLoader::new(counting_bytes(10));
    assert_eq!(loader.read(8, 100).await?, vec![8, 9]);
    assert_eq!(loader.read(20, 4).await?, Vec::<u8>::new());
    Ok(())
}

#[tokio::test]
async fn u32_across_chunks_faults_until_both_are_loaded() -> Result<()> {
    let (loader, r) = paged(counting_bytes(32), 8);

    assert_eq!(
        r.u32(5),
        Err(ReadError::NotLoaded {
            source: r.source_id(),
            offset: 5,
            len: 4
        })
    );

    r.ensure_loaded(0, 1).await?;
    assert!(matches!(
        r.u32(5),
        Err(ReadError::NotLoaded { offset: 5, len: 4, .. })
    ));

    r.ensure_loaded(5, 4).await?;
    assert_eq!(r.u32(5)?, u32::from_le_bytes([5, 6, 7, 8]));
    assert_eq!(loader.reads(), vec![(0, 8), (8, 8)]);
    Ok(())
}

#[tokio::test]
async fn adjacent_chunks_are_fetched_in_one_call() -> Result<()> {
    let (loader, r) = paged(counting_bytes(32), 4);
    r.ensure_loaded(1, 6).await?;
    assert_eq!(loader.reads(), vec![(0, 8)]);
    assert_eq!(r.copy_bytes(0, 8)?, counting_bytes(8));
    Ok(())
}

#[tokio::test]
async fn partial_chunk_fetch_loads_whole_chunk() -> Result<()> {
    let (loader, r) = paged(counting_bytes(32), 4);
    r.ensure_loaded(0, 2).await?;
    assert_eq!(r.u16(2)?, 0x0302);

    r.ensure_loaded(2, 2).await?;
    assert_eq!(loader.read_count(), 1);
    Ok(())
}

#[tokio::test]
async fn resident_chunks_are_not_fetched_again() -> Result<()> {
    let (loader, r) = paged(counting_bytes(32), 4);
    r.ensure_loaded(8, 4).await?;
    r.ensure_loaded(4, 12).await?;
    assert_eq!(loader.reads(), vec![(8, 4), (4, 4), (12, 4)]);
    assert_eq!(r.copy_bytes(4, 12)?, &counting_bytes(16)[4..]);
    Ok(())
}

#[tokio::test]
async fn last_chunk_is_clamped_to_size() -> Result<()> {
    let (loader, r) = paged(counting_bytes(10), 8);
    r.ensure_loaded(0, 100).await?;
    assert_eq!(loader.reads(), vec![(0, 10)]);
    assert_eq!(r.u16(8)?, 0x0908);
    assert!(matches!(r.u16(9), Err(ReadError::OutOfBounds { .. })));
    Ok(())
}

#[tokio::test]
async fn out_of_bounds_is_not_a_fault() {
    let (_loader, r) = paged(counting_bytes(10), 8);
    assert!(matches!(r.u32(8), Err(ReadError::OutOfBounds { .. })));
}

#[tokio::test]
async fn paged_reads_match_reference_reader() -> Result<()> {
    let data = counting_bytes(100);
    let reference = SliceReader::new(&data);
    for chunk_size in [1, 2, 4, 8, 64, 128] {
        for (offset, len) in [(0, 4), (3, 4), (7, 2), (60, 4), (96, 4), (31, 1)] {
            let (_loader, r) = paged(data.clone(), chunk_size);
            let fault = r.copy_bytes(offset, len).unwrap_err();
            assert!(matches!(
                fault,
                ReadError::NotLoaded { offset: o, len: l, .. } if o == offset && l == len
            ));

            r.ensure_loaded(offset, len).await?;
            assert_eq!(r.copy_bytes(offset, len)?, reference.copy_bytes(offset, len)?);
            if len == 4 {
                assert_eq!(r.u32(offset)?, reference.u32(offset)?);
            }
        }
    }
    Ok(())
}

/// Yields to the scheduler before answering, so that concurrent callers overlap.
struct SlowLoader(BufferLoader);

#[async_trait(?Send)]
impl Loader for SlowLoader {
    fn size(&self) -> u64 {
        self.0.size()
    }

    async fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        self.0.read(offset, len).await
    }
}

#[tokio::test]
async fn concurrent_loads_share_in_flight_fetch() -> Result<()> {
    let loader = Rc::new(SlowLoader(BufferLoader::new(counting_bytes(64))));
    let r = PagedReader::with_chunk_size(loader.clone(), 16)?;

    let (a, b) = tokio::join!(r.ensure_loaded(0, 20), r.ensure_loaded(4, 8));
    a?;
    b?;
    assert_eq!(loader.0.reads(), vec![(0, 32)]);
    assert!(r.is_loaded(0, 32));
    assert!(!r.is_loaded(32, 1));
    Ok(())
}

#[tokio::test]
async fn in_flight_chunks_are_not_requested_twice() -> Result<()> {
    let loader = Rc::new(SlowLoader(BufferLoader::new(counting_bytes(64))));
    let r = PagedReader::with_chunk_size(loader.clone(), 16)?;

    let (a, b) = tokio::join!(r.ensure_loaded(16, 4), r.ensure_loaded(0, 48));
    a?;
    b?;
    let mut reads = loader.0.reads();
    reads.sort();
    assert_eq!(reads, vec![(0, 16), (16, 16), (32, 16)]);
    assert!(r.is_loaded(0, 48));
    Ok(())
}

struct FailingLoader;

#[async_trait(?Send)]
impl Loader for FailingLoader {
    fn size(&self) -> u64 {
        16
    }

    async fn read(&self, _offset: u64, _len: u64) -> Result<Vec<u8>> {
        anyhow::bail!("network unavailable")
    }
}

#[tokio::test]
async fn failed_fetch_leaves_chunks_absent() {
    let r = PagedReader::with_chunk_size(Rc::new(FailingLoader), 8).unwrap();
    let e = r.ensure_loaded(0, 4).await.unwrap_err();
    assert!(format!("{e:#}").contains("network unavailable"));
    assert!(!r.is_loaded(0, 4));
    assert!(matches!(r.u8(0), Err(ReadError::NotLoaded { .. })));
}

#[tokio::test]
async fn find_byte_faults_one_chunk_at_a_time() -> Result<()> {
    let mut data = vec![b'a'; 32];
    data[10] = 0;
    let (_loader, r) = paged(data, 8);
    r.ensure_loaded(0, 8).await?;
    assert!(matches!(
        r.find_byte(0, 2, None),
        Err(ReadError::NotLoaded { offset: 8, len: 8, .. })
    ));
    r.ensure_loaded(8, 8).await?;
    assert_eq!(r.find_byte(0, 2, None)?, Some(10));
    Ok(())
}

#[tokio::test]
async fn load_scope_retries_until_complete() -> Result<()> {
    let mut data = counting_bytes(64);
    data[40..46].copy_from_slice(b"hello\0");
    let (loader, r) = paged(data, 8);

    let logger = CapturingLogger::new();
    let mut attempts = 0;
    let (sum, name) = with_load_scope(&[&r], &logger, |log| {
        attempts += 1;
        log.log("decoding", &r.locate(0));
        let sum = r.u32(0)? + r.u32(20)?;
        let name = r.sub_view(38, None).read_utf8_c_string(2)?;
        Ok((sum, name))
    })
    .await?;

    assert_eq!(sum, u32::from_le_bytes([0, 1, 2, 3]) + u32::from_le_bytes([20, 21, 22, 23]));
    assert_eq!(name, "hello");
    assert_eq!(attempts, 4);
    assert_eq!(loader.read_count(), 3);
    assert_eq!(logger.messages(), vec!["decoding".to_string()]);
    Ok(())
}

#[tokio::test]
async fn load_scope_passes_other_errors_through() {
    let (_loader, r) = paged(counting_bytes(8), 8);
    let logger = CapturingLogger::new();
    let e = with_load_scope(&[&r], &logger, |log| {
        log.log("before failing", &Location::default());
        r.u32(0)?;
        r.u32(6)?;
        Ok(())
    })
    .await
    .unwrap_err();
    assert!(matches!(
        e.downcast_ref::<ReadError>(),
        Some(ReadError::OutOfBounds { .. })
    ));
    assert!(!is_fault(&e));
    assert_eq!(logger.messages(), vec!["before failing".to_string()]);
}

#[tokio::test]
async fn load_scope_rejects_faults_from_unknown_readers() {
    let (_loader_a, a) = paged(counting_bytes(8), 8);
    let (_loader_b, b) = paged(counting_bytes(8), 8);
    let r = with_load_scope(&[&a], &NullLogger, |_| Ok(b.u8(0)?)).await;
    assert!(r.is_err());
}
