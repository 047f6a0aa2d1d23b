//! End-to-end tests over a composite executable: launcher bytes, then a
//! zip archive holding minimal ELF shared objects.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Barrier};

use capsule_elf::testimage::ImageBuilder;
use capsule_elf::{ElfClass, ElfImage};
use capsule_runtime::{
    ExtractError, LoaderContext, Resolve, ResolvedTarget, ResolverChain, MAX_CHAIN_DEPTH,
    REWRITE_TOKEN,
};

fn write_composite(path: &Path, members: &[(&str, Vec<u8>)]) {
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(b"launcher stand-in").unwrap();
    file.write_all(&vec![0x90; 512]).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in members {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

fn packed_context(dir: &Path, members: &[(&str, Vec<u8>)]) -> LoaderContext {
    let exe = dir.join("app");
    write_composite(&exe, members);
    let ctx = LoaderContext::new(exe).unwrap();
    assert!(ctx.is_packed());
    ctx
}

/// spam.so declares libhelper.so with runtime path $ORIGIN; resolving it
/// extracts both into one scratch directory and the patched search path
/// reads $ORIGIN when parsed back.
#[test]
fn test_end_to_end_origin_chain() {
    let dir = tempfile::tempdir().unwrap();
    let spam = ImageBuilder::new(ElfClass::Elf64)
        .needed("libhelper.so")
        .runpath("$ORIGIN")
        .build();
    let helper = ImageBuilder::new(ElfClass::Elf64).no_dynamic().build();
    let ctx = packed_context(
        dir.path(),
        &[("pkg/spam.so", spam), ("pkg/libhelper.so", helper)],
    );

    let resolver = ctx.embedded_resolver(".so").unwrap();
    let target = resolver.try_resolve("pkg.spam", None).unwrap().unwrap();
    let extracted = match target {
        ResolvedTarget::Native(path) => path,
        other => panic!("expected a native module, got {other:?}"),
    };

    assert!(extracted.ends_with("spam.so"));
    assert!(extracted.exists());
    let sibling = extracted.parent().unwrap().join("libhelper.so");
    assert!(sibling.exists(), "dependency must land in the same directory");

    let patched = ElfImage::parse_file(&extracted).unwrap();
    assert_eq!(patched.runpath().unwrap().text, REWRITE_TOKEN);
    assert_eq!(
        patched.needed().collect::<Vec<_>>(),
        vec!["libhelper.so"]
    );

    assert_eq!(ctx.extraction_cache().unwrap().extractions(), 2);
}

#[test]
fn test_resolution_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let solo = ImageBuilder::new(ElfClass::Elf64).no_dynamic().build();
    let ctx = packed_context(dir.path(), &[("pkg/solo.so", solo)]);
    let cache = ctx.extraction_cache().unwrap();

    let first = cache.resolve("pkg/solo.so").unwrap();
    let second = cache.resolve("pkg/solo.so").unwrap();
    assert_eq!(first, second);
    assert_eq!(cache.extractions(), 1);
}

#[test]
fn test_reextracts_when_backing_file_vanished() {
    let dir = tempfile::tempdir().unwrap();
    let solo = ImageBuilder::new(ElfClass::Elf64).no_dynamic().build();
    let ctx = packed_context(dir.path(), &[("pkg/solo.so", solo)]);
    let cache = ctx.extraction_cache().unwrap();

    let first = cache.resolve("pkg/solo.so").unwrap();
    std::fs::remove_file(&first).unwrap();
    let second = cache.resolve("pkg/solo.so").unwrap();
    assert!(second.exists());
    assert_eq!(cache.extractions(), 2);
}

/// A needs B, B needs A: resolution terminates and both end up extracted.
#[test]
fn test_dependency_cycle_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let liba = ImageBuilder::new(ElfClass::Elf64)
        .needed("libb.so")
        .runpath("$ORIGIN")
        .build();
    let libb = ImageBuilder::new(ElfClass::Elf64)
        .needed("liba.so")
        .runpath("$ORIGIN")
        .build();
    let ctx = packed_context(dir.path(), &[("pkg/liba.so", liba), ("pkg/libb.so", libb)]);
    let cache = ctx.extraction_cache().unwrap();

    let a = cache.resolve("pkg/liba.so").unwrap();
    let b = a.parent().unwrap().join("libb.so");
    assert!(a.exists());
    assert!(b.exists());
    assert_eq!(cache.extractions(), 2);

    // both are Ready now; asking for B directly is a cache hit
    assert_eq!(cache.resolve("pkg/libb.so").unwrap(), b);
    assert_eq!(cache.extractions(), 2);
}

/// A parent's search path is inherited by a dependency that has none of
/// its own, for lookup only.
#[test]
fn test_inherited_template_reaches_transitive_deps() {
    let dir = tempfile::tempdir().unwrap();
    let liba = ImageBuilder::new(ElfClass::Elf64)
        .needed("libb.so")
        .runpath("$ORIGIN")
        .build();
    let libb = ImageBuilder::new(ElfClass::Elf64).needed("libc2.so").build();
    let libc2 = ImageBuilder::new(ElfClass::Elf64).no_dynamic().build();
    let ctx = packed_context(
        dir.path(),
        &[
            ("pkg/liba.so", liba),
            ("pkg/libb.so", libb),
            ("pkg/libc2.so", libc2),
        ],
    );
    let cache = ctx.extraction_cache().unwrap();

    let a = cache.resolve("pkg/liba.so").unwrap();
    let chain_dir = a.parent().unwrap();
    assert!(chain_dir.join("libb.so").exists());
    assert!(chain_dir.join("libc2.so").exists());
    assert_eq!(cache.extractions(), 3);

    // the dependency without its own search path was not rewritten
    let b = ElfImage::parse_file(&chain_dir.join("libb.so")).unwrap();
    assert!(b.runpath().is_none());
}

/// $ORIGIN/.. resolves against the member's own archive directory.
#[test]
fn test_parent_relative_search_path() {
    let dir = tempfile::tempdir().unwrap();
    let rpath = ImageBuilder::new(ElfClass::Elf64)
        .needed("libdep.so")
        .runpath("$ORIGIN/..")
        .build();
    let dep = ImageBuilder::new(ElfClass::Elf64).no_dynamic().build();
    let ctx = packed_context(
        dir.path(),
        &[("sub/sub2/rpath.so", rpath), ("sub/libdep.so", dep)],
    );
    let cache = ctx.extraction_cache().unwrap();

    let extracted = cache.resolve("sub/sub2/rpath.so").unwrap();
    assert!(extracted.parent().unwrap().join("libdep.so").exists());

    let patched = ElfImage::parse_file(&extracted).unwrap();
    assert_eq!(patched.runpath().unwrap().text, REWRITE_TOKEN);
}

/// A search path shorter than the rewrite token is left alone: the module
/// still resolves, a warning is recorded, and its bundled dependency is
/// not extracted.
#[test]
fn test_rewrite_too_long_is_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let tight = ImageBuilder::new(ElfClass::Elf64)
        .needed("libdep.so")
        .runpath("/l")
        .build();
    let dep = ImageBuilder::new(ElfClass::Elf64).no_dynamic().build();
    let ctx = packed_context(dir.path(), &[("pkg/tight.so", tight), ("pkg/libdep.so", dep)]);
    let cache = ctx.extraction_cache().unwrap();

    let extracted = cache.resolve("pkg/tight.so").unwrap();
    assert!(extracted.exists());
    assert_eq!(cache.warnings().len(), 1);
    assert_eq!(cache.extractions(), 1, "dependency must not be extracted");

    let unpatched = ElfImage::parse_file(&extracted).unwrap();
    assert_eq!(unpatched.runpath().unwrap().text, "/l");
}

/// A member that is not a valid ELF image fails, and the failure is
/// shared with later callers instead of retrying the work.
#[test]
fn test_failed_extraction_is_shared() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = packed_context(dir.path(), &[("pkg/bad.so", b"not an elf".to_vec())]);
    let cache = ctx.extraction_cache().unwrap();

    assert!(matches!(
        cache.resolve("pkg/bad.so"),
        Err(ExtractError::Format { .. })
    ));
    assert!(matches!(
        cache.resolve("pkg/bad.so"),
        Err(ExtractError::Failed { .. })
    ));
}

/// Two threads resolving opposite ends of a mutual dependency pair at
/// the same time both finish: chain extraction is serialized, so
/// entangled members split across threads cannot wait on each other.
#[test]
fn test_concurrent_mutual_dependencies_terminate() {
    let dir = tempfile::tempdir().unwrap();
    let liba = ImageBuilder::new(ElfClass::Elf64)
        .needed("libb.so")
        .runpath("$ORIGIN")
        .build();
    let libb = ImageBuilder::new(ElfClass::Elf64)
        .needed("liba.so")
        .runpath("$ORIGIN")
        .build();
    let ctx = Arc::new(packed_context(
        dir.path(),
        &[("pkg/liba.so", liba), ("pkg/libb.so", libb)],
    ));

    let barrier = Arc::new(Barrier::new(2));
    std::thread::scope(|scope| {
        for member in ["pkg/liba.so", "pkg/libb.so"] {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            scope.spawn(move || {
                barrier.wait();
                let path = ctx.extraction_cache().unwrap().resolve(member).unwrap();
                assert!(path.exists());
            });
        }
    });

    // whichever chain ran first extracted both; the other hit the cache
    assert_eq!(ctx.extraction_cache().unwrap().extractions(), 2);
}

/// A dependency chain longer than the documented bound aborts instead of
/// recursing without limit.
#[test]
fn test_chain_deeper_than_bound_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let count = MAX_CHAIN_DEPTH + 2;
    let mut images = Vec::new();
    for i in 0..count {
        let mut builder = ImageBuilder::new(ElfClass::Elf64).runpath("$ORIGIN");
        if i + 1 < count {
            builder = builder.needed(&format!("lib{}.so", i + 1));
        }
        images.push((format!("pkg/lib{}.so", i), builder.build()));
    }
    let members: Vec<(&str, Vec<u8>)> = images
        .iter()
        .map(|(name, data)| (name.as_str(), data.clone()))
        .collect();
    let ctx = packed_context(dir.path(), &members);

    assert!(matches!(
        ctx.extraction_cache().unwrap().resolve("pkg/lib0.so"),
        Err(ExtractError::ChainTooDeep(_))
    ));
}

#[test]
fn test_concurrent_resolution_is_single_flight() {
    let dir = tempfile::tempdir().unwrap();
    let solo = ImageBuilder::new(ElfClass::Elf64).no_dynamic().build();
    let ctx = Arc::new(packed_context(dir.path(), &[("pkg/solo.so", solo)]));

    let barrier = Arc::new(Barrier::new(4));
    std::thread::scope(|scope| {
        for _ in 0..4 {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            scope.spawn(move || {
                barrier.wait();
                ctx.extraction_cache()
                    .unwrap()
                    .resolve("pkg/solo.so")
                    .unwrap()
            });
        }
    });

    assert_eq!(ctx.extraction_cache().unwrap().extractions(), 1);
}

#[test]
fn test_resolver_data_native_and_fall_through() {
    let dir = tempfile::tempdir().unwrap();
    let spam = ImageBuilder::new(ElfClass::Elf64).no_dynamic().build();
    let ctx = packed_context(
        dir.path(),
        &[
            ("pkg/spam.so", spam),
            ("pkg/config.json", b"{}".to_vec()),
        ],
    );
    let resolver = ctx.embedded_resolver(".so").unwrap();

    assert!(matches!(
        resolver.try_resolve("pkg.spam", None).unwrap(),
        Some(ResolvedTarget::Native(_))
    ));
    assert_eq!(
        resolver.try_resolve("pkg/config.json", None).unwrap(),
        Some(ResolvedTarget::Data("pkg/config.json".to_string()))
    );
    assert!(resolver.try_resolve("pkg.missing", None).unwrap().is_none());

    assert!(resolver.contains("pkg.spam"));
    assert!(resolver.contains("pkg/config.json"));
    assert!(!resolver.contains("pkg.missing"));

    let mut chain = ResolverChain::new();
    chain.push(Box::new(resolver));
    assert!(chain.resolve("nope", None).unwrap().is_none());
}

#[test]
fn test_unpacked_executable_not_applicable() {
    let dir = tempfile::tempdir().unwrap();
    let exe = dir.path().join("plain");
    std::fs::write(&exe, b"ordinary binary, no archive").unwrap();

    let ctx = LoaderContext::new(exe).unwrap();
    assert!(!ctx.is_packed());
    assert!(ctx.vfs().is_none());
    assert!(ctx.archive().is_none());
    assert!(ctx.extraction_cache().is_none());
    assert!(ctx.embedded_resolver(".so").is_none());
}

#[test]
fn test_scratch_cleanup_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let solo = ImageBuilder::new(ElfClass::Elf64).no_dynamic().build();
    let ctx = packed_context(dir.path(), &[("pkg/solo.so", solo)]);

    let scratch = ctx.extraction_cache().unwrap().scratch_dir().to_path_buf();
    let extracted = ctx
        .extraction_cache()
        .unwrap()
        .resolve("pkg/solo.so")
        .unwrap();
    assert!(extracted.exists());

    drop(ctx);
    assert!(!scratch.exists(), "scratch directory must be removed");
}
