use memdrive::cache::{CacheCaps, FileBacking, FileCache, FlushMode, PurgeMode};
use memdrive::{FsError, MemDrive};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("demo") => {
            if let Err(e) = drive_demo().await {
                eprintln!("demo failed: {e} (errno {})", e.errno());
                std::process::exit(1);
            }
            println!("demo: OK");
        }
        Some("demo-filecache") => {
            let dir = match args.next() {
                Some(p) => p,
                None => {
                    eprintln!("Usage: memdrive demo-filecache <dir>");
                    std::process::exit(2);
                }
            };
            if let Err(e) = file_cache_demo(&dir).await {
                eprintln!("demo-filecache failed: {e:?}");
                std::process::exit(1);
            }
            println!("demo-filecache: OK");
        }
        _ => {
            println!(
                "Hello, I'm memdrive!\nUsage:\n  memdrive demo\n  memdrive demo-filecache <dir>"
            );
        }
    }
}

/// End-to-end walk over the in-memory drive.
async fn drive_demo() -> Result<(), FsError> {
    let drive = MemDrive::default();

    drive.mkdir("/docs", 0o755, 0, 0).await?;
    let fh = drive.create("/docs/hello.txt", 0o644, 0, 0).await?;
    drive.write("/docs/hello.txt", Some(fh), 0, b"hello, virtual drive").await?;

    let attr = drive.getattr("/docs/hello.txt").await?;
    println!("size after write: {}", attr.size);

    let data = drive.read("/docs/hello.txt", Some(fh), 0, 64).await?;
    println!("read back: {}", String::from_utf8_lossy(&data));

    drive.rename("/docs/hello.txt", "/docs/greeting.txt").await?;
    drive
        .readdir("/docs", true, &mut |e| {
            println!("  {} ({} bytes)", e.name, e.size);
            0
        })
        .await?;

    let st = drive.statfs();
    println!("{} of {} blocks free", st.free_blocks, st.total_blocks);

    drive.release(fh).await?;
    drive.shutdown().await
}

/// Run the cache adaptor against a real directory-backed store: one write
/// buffered, flushed on close, read back through a cold cache.
async fn file_cache_demo(dir: &str) -> Result<(), memdrive::CacheError> {
    let backing = FileBacking::new(dir);
    let handle = backing.register("demo.bin");
    let cache = FileCache::new(backing, CacheCaps::default());

    cache.file_open("/demo.bin", 0, 0, handle).await;
    cache.write("/demo.bin", 0, b"spilled to disk on close").await?;
    cache.file_close("/demo.bin", FlushMode::Immediate, PurgeMode::None).await?;

    let backing = FileBacking::new(dir);
    let handle = backing.register("demo.bin");
    let cache = FileCache::new(backing, CacheCaps::default());
    cache.file_open("/demo.bin", 24, 0, handle).await;
    let out = cache.read("/demo.bin", 0, 64).await?;
    println!("read back from cache file: {}", String::from_utf8_lossy(&out.data));
    cache.file_close("/demo.bin", FlushMode::Immediate, PurgeMode::None).await?;
    Ok(())
}
