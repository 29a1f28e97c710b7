use modpm::installation::InstallError;
use modpm::installation::deployment::DeploymentError;
use modpm::installation::progress::{ByteRateProgress, Prompt};
use modpm::metadb::package::*;
use modpm::relationship_resolver::{RelationshipResolverOptions, ResolutionError};
use modpm_test_utils::{package, providing, locator_for, Fixture, LocalDownloader};
use tokio_util::sync::CancellationToken;

const A_FILES: &[(&str, &[u8])] = &[
	("A/a.cfg", b"a config"),
	("A/Plugins/a.dll", b"not really a dll"),
	("A/Textures/a.png", b"pixels"),
];

#[tokio::test]
async fn install_places_files_and_registers_them() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), A_FILES).unwrap();

	let report = f.installer().install_list(vec![a], &Default::default(), None).await.unwrap();
	assert_eq!(report.installed, [PackageIdentifier::new("A", "1.0")]);
	assert_eq!(std::fs::read(f.game_path().join("GameData/A/Plugins/a.dll")).unwrap(), b"not really a dll");

	let registry = f.instance.registry();
	assert_eq!(registry.file_owner("GameData/A/a.cfg"), Some("A"));
	assert_eq!(registry.installed_package("A").unwrap().files().len(), 3);
	assert!(!registry.installed_package("A").unwrap().is_auto_installed());
}

#[tokio::test]
async fn dependencies_are_installed_as_auto() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &["B"]), &[("A/a.cfg", b"a")]).unwrap();
	f.add_package(package("B", "1.0", &[]), &[("B/b.cfg", b"b")]).unwrap();

	let report = f.installer().install_list(vec![a], &Default::default(), None).await.unwrap();
	assert_eq!(report.installed, [PackageIdentifier::new("B", "1.0"), PackageIdentifier::new("A", "1.0")]);
	assert!(f.instance.registry().installed_package("B").unwrap().is_auto_installed());
	assert!(f.game_path().join("GameData/B/b.cfg").is_file());
}

#[tokio::test]
async fn registry_is_persisted() {
	let mut f = Fixture::new().unwrap();
	f.instance.save_to_disk().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), A_FILES).unwrap();
	f.installer().install_list(vec![a], &Default::default(), None).await.unwrap();

	let loaded = modpm::GameInstance::load_from_disk(f.data_dir.path()).unwrap();
	assert_eq!(loaded.registry().file_owner("GameData/A/a.cfg"), Some("A"));
}

#[tokio::test]
async fn cancelling_at_any_file_leaves_nothing_behind() {
	for cancel_after in 0..A_FILES.len() {
		let mut f = Fixture::new().unwrap();
		let a = f.add_package(package("A", "1.0", &[]), A_FILES).unwrap();
		let before = f.snapshot().unwrap();

		let token = CancellationToken::new();
		if cancel_after == 0 {
			token.cancel();
		}
		let trigger = token.clone();
		let mut copied = 0;
		let result = f.installer()
			.cancellation_token(token)
			.on_progress(move |_: &ByteRateProgress| {
				copied += 1;
				if copied == cancel_after {
					trigger.cancel();
				}
			})
			.install_list(vec![a], &Default::default(), None)
			.await;

		assert!(matches!(result, Err(InstallError::Cancelled)), "cancelled after {cancel_after} files");
		assert_eq!(f.snapshot().unwrap(), before);
		assert!(!f.instance.registry().is_installed("A"));
	}
}

#[tokio::test]
async fn failed_install_restores_overwritten_file() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), &[("A/a.cfg", b"ours"), ("A/b.cfg", b"b")]).unwrap();
	std::fs::create_dir_all(f.game_path().join("GameData/A")).unwrap();
	std::fs::write(f.game_path().join("GameData/A/a.cfg"), "theirs").unwrap();
	let before = f.snapshot().unwrap();

	let token = CancellationToken::new();
	let trigger = token.clone();
	let result = f.installer()
		.headless(false)
		.cancellation_token(token)
		.on_progress(move |_: &ByteRateProgress| trigger.cancel())
		.install_list(vec![a], &Default::default(), None)
		.await;

	assert!(matches!(result, Err(InstallError::Cancelled)));
	assert_eq!(f.snapshot().unwrap(), before);
}

#[tokio::test]
async fn declined_install_changes_nothing() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), A_FILES).unwrap();
	let before = f.snapshot().unwrap();

	let result = f.installer()
		.on_confirm(|p: &Prompt| !matches!(p, Prompt::ContinueInstall { .. }))
		.install_list(vec![a], &Default::default(), None)
		.await;
	assert!(matches!(result, Err(InstallError::Cancelled)));
	assert_eq!(f.snapshot().unwrap(), before);
}

#[tokio::test]
async fn foreign_file_fails_headless_install() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), &[("A/x.cfg", b"ours")]).unwrap();
	std::fs::create_dir_all(f.game_path().join("GameData/A")).unwrap();
	std::fs::write(f.game_path().join("GameData/A/x.cfg"), "theirs").unwrap();

	let result = f.installer().install_list(vec![a], &Default::default(), None).await;
	assert!(matches!(result, Err(InstallError::ForeignFileConflict { path, .. }) if path == "GameData/A/x.cfg"));
	assert_eq!(std::fs::read_to_string(f.game_path().join("GameData/A/x.cfg")).unwrap(), "theirs");
	assert!(!f.instance.registry().is_installed("A"));
}

#[tokio::test]
async fn foreign_file_is_overwritten_when_confirmed() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), &[("A/x.cfg", b"ours")]).unwrap();
	std::fs::create_dir_all(f.game_path().join("GameData/A")).unwrap();
	std::fs::write(f.game_path().join("GameData/A/x.cfg"), "theirs").unwrap();

	let mut asked = Vec::<Prompt>::new();
	f.installer()
		.headless(false)
		.on_confirm(|p: &Prompt| { asked.push(p.clone()); true })
		.install_list(vec![a], &Default::default(), None)
		.await
		.unwrap();

	assert!(asked.iter().any(|p| matches!(p, Prompt::Overwrite { files, .. } if files == &["GameData/A/x.cfg".to_string()])));
	assert_eq!(std::fs::read_to_string(f.game_path().join("GameData/A/x.cfg")).unwrap(), "ours");
	assert_eq!(f.instance.registry().file_owner("GameData/A/x.cfg"), Some("A"));
}

#[tokio::test]
async fn identical_existing_file_is_adopted() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), &[("A/x.cfg", b"same")]).unwrap();
	std::fs::create_dir_all(f.game_path().join("GameData/A")).unwrap();
	std::fs::write(f.game_path().join("GameData/A/x.cfg"), "same").unwrap();

	f.installer().install_list(vec![a], &Default::default(), None).await.unwrap();
	assert_eq!(f.instance.registry().file_owner("GameData/A/x.cfg"), Some("A"));
}

#[tokio::test]
async fn file_owned_by_another_package_fails() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), &[("A/x.cfg", b"a")]).unwrap();
	let mut b = package("B", "1.0", &[]);
	b.install = vec![InstallDirective::new(SourceDirective::File("B/x.cfg".to_string()), "GameData/A", Vec::new())];
	let b = f.add_package(b, &[("B/x.cfg", b"b")]).unwrap();

	f.installer().install_list(vec![a], &Default::default(), None).await.unwrap();
	let before = f.snapshot().unwrap();
	let result = f.installer().install_list(vec![b], &Default::default(), None).await;
	assert!(matches!(result, Err(InstallError::FileExists { owner, .. }) if owner == "A"));
	assert_eq!(f.snapshot().unwrap(), before);
	assert!(!f.instance.registry().is_installed("B"));
}

#[tokio::test]
async fn insufficient_space_is_refused() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), A_FILES).unwrap();
	let result = f.installer()
		.free_space_check(|_: &std::path::Path| Ok(1))
		.install_list(vec![a], &Default::default(), None)
		.await;
	assert!(matches!(result, Err(InstallError::InsufficientSpace { available: 1, .. })));
}

#[tokio::test]
async fn uncached_archive_without_downloader_is_missing() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_uncached_package(package("A", "1.0", &[]), A_FILES).unwrap();
	let result = f.installer().install_list(vec![a], &Default::default(), None).await;
	assert!(matches!(result, Err(InstallError::ArchiveMissing(id)) if id.identifier == "A"));
}

#[tokio::test]
async fn downloaded_archives_are_cached_and_installed() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_uncached_package(package("A", "1.0", &["B"]), &[("A/a.cfg", b"a")]).unwrap();
	f.add_package(package("B", "1.0", &[]), &[("B/b.cfg", b"b")]).unwrap();
	let downloader = LocalDownloader::for_fixture(&f);

	let report = f.installer().install_list(vec![a.clone()], &Default::default(), Some(&downloader)).await.unwrap();
	assert_eq!(report.installed.len(), 2);
	assert!(f.game_path().join("GameData/A/a.cfg").is_file());
	assert!(f.cache.is_package_cached(&a));
}

#[tokio::test]
async fn failed_download_rolls_back() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_uncached_package(package("A", "1.0", &["B"]), &[("A/a.cfg", b"a")]).unwrap();
	f.add_package(package("B", "1.0", &[]), &[("B/b.cfg", b"b")]).unwrap();
	let before = f.snapshot().unwrap();
	let downloader = LocalDownloader { staging: f.staging_dir.path().to_path_buf(), ..Default::default() };

	let result = f.installer().install_list(vec![a], &Default::default(), Some(&downloader)).await;
	assert!(matches!(result, Err(InstallError::Download { .. })));
	assert_eq!(f.snapshot().unwrap(), before);
	assert!(!f.instance.registry().is_installed("B"));
}

#[tokio::test]
async fn dlc_is_forbidden() {
	let mut f = Fixture::new().unwrap();
	let mut dlc = Package::new("Expansion", "1.0");
	dlc.kind = Kind::DLC;
	let dlc = f.add_bare_package(dlc);
	let result = f.installer().install_list(vec![dlc], &Default::default(), None).await;
	assert!(matches!(result, Err(InstallError::Forbidden(_))));
}

#[tokio::test]
async fn metapackage_registers_without_files() {
	let mut f = Fixture::new().unwrap();
	let mut meta = package("Pack", "1.0", &["A"]);
	meta.kind = Kind::MetaPackage;
	let meta = f.add_bare_package(meta);
	f.add_package(package("A", "1.0", &[]), A_FILES).unwrap();

	f.installer().install_list(vec![meta], &Default::default(), None).await.unwrap();
	let registry = f.instance.registry();
	assert!(registry.installed_package("Pack").unwrap().files().is_empty());
	assert!(registry.is_installed("A"));
}

#[tokio::test]
async fn upgrade_replaces_old_version() {
	let mut f = Fixture::new().unwrap();
	let old = f.add_package(package("A", "1.0", &[]), &[("A/old.cfg", b"old"), ("A/common.cfg", b"1")]).unwrap();
	f.installer().install_list(vec![old], &Default::default(), None).await.unwrap();

	let new = f.add_package(package("A", "2.0", &[]), &[("A/new.cfg", b"new"), ("A/common.cfg", b"2")]).unwrap();
	let report = f.installer().install_list(vec![new], &Default::default(), None).await.unwrap();

	assert_eq!(report.superseded, [PackageIdentifier::new("A", "1.0")]);
	assert!(!f.game_path().join("GameData/A/old.cfg").exists());
	assert_eq!(std::fs::read(f.game_path().join("GameData/A/common.cfg")).unwrap(), b"2");
	assert_eq!(f.instance.registry().installed_version("A"), Some(&PackageVersion::new("2.0")));
}

#[tokio::test]
async fn installed_target_is_reselected() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &["B"]), &[("A/a.cfg", b"a")]).unwrap();
	let b = f.add_package(package("B", "1.0", &[]), &[("B/b.cfg", b"b")]).unwrap();
	f.installer().install_list(vec![a], &Default::default(), None).await.unwrap();

	let report = f.installer().install_list(vec![b], &Default::default(), None).await.unwrap();
	assert!(report.installed.is_empty());
	assert_eq!(report.reselected, [PackageIdentifier::new("B", "1.0")]);
	assert!(!f.instance.registry().installed_package("B").unwrap().is_auto_installed());
}

#[tokio::test]
async fn filtered_files_are_skipped() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), &[("A/a.cfg", b"a"), ("A/Thumbs.db", b"junk")]).unwrap();
	let report = f.installer().install_list(vec![a], &Default::default(), None).await.unwrap();
	assert_eq!(report.filtered_files, 1);
	assert!(!f.game_path().join("GameData/A/Thumbs.db").exists());
	assert_eq!(f.instance.registry().installed_package("A").unwrap().files().len(), 1);
}

#[tokio::test]
async fn instance_filters_are_applied() {
	let mut f = Fixture::new().unwrap();
	f.instance.set_install_filters(vec!["MiniAVC".to_string()]);
	let a = f.add_package(package("A", "1.0", &[]), &[("A/a.cfg", b"a"), ("A/MiniAVC.dll", b"avc")]).unwrap();
	f.installer().install_list(vec![a], &Default::default(), None).await.unwrap();
	assert!(!f.game_path().join("GameData/A/MiniAVC.dll").exists());
}

#[tokio::test]
async fn archive_without_matching_files_fails() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), &[("Other/x.cfg", b"x")]).unwrap();
	let result = f.installer().install_list(vec![a], &Default::default(), None).await;
	assert!(matches!(result, Err(InstallError::NoInstallableFiles(_))));
}

#[tokio::test]
async fn cache_is_trimmed_after_install() {
	let mut f = Fixture::new().unwrap();
	f.config.set_cache_size_limit(Some(0));
	let a = f.add_package(package("A", "1.0", &[]), A_FILES).unwrap();
	let unused = f.add_package(package("Unused", "1.0", &[]), &[("Unused/u.cfg", b"u")]).unwrap();

	let report = f.installer().install_list(vec![a.clone()], &Default::default(), None).await.unwrap();
	assert_eq!(report.evicted, [locator_for(&unused.identifier)]);
	assert!(f.cache.is_package_cached(&a));
	assert!(!f.cache.is_package_cached(&unused));
}

#[tokio::test]
async fn conflicting_package_is_refused() {
	let mut f = Fixture::new().unwrap();
	let b = f.add_package(package("B", "1.0", &[]), &[("B/b.cfg", b"b")]).unwrap();
	let mut a = package("A", "1.0", &[]);
	a.conflicts = vec![PackageDescriptor::any("B").into()];
	let a = f.add_package(a, &[("A/a.cfg", b"a")]).unwrap();

	f.installer().install_list(vec![b], &Default::default(), None).await.unwrap();
	let result = f.installer().install_list(vec![a], &Default::default(), None).await;
	assert!(matches!(result, Err(InstallError::Resolution(ResolutionError::Inconsistent(_)))));
}

#[tokio::test]
async fn ambiguous_provider_needs_a_choice() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &["Z"]), &[("A/a.cfg", b"a")]).unwrap();
	let b = f.add_package(providing("B", "Z"), &[("B/b.cfg", b"b")]).unwrap();
	f.add_package(providing("C", "Z"), &[("C/c.cfg", b"c")]).unwrap();

	let result = f.installer().install_list(vec![a.clone()], &Default::default(), None).await;
	let Err(InstallError::Resolution(ResolutionError::TooManyProviders(info))) = result else { panic!("expected a decision") };
	assert_eq!(info.options.len(), 2);

	f.installer().install_list(vec![a, b], &RelationshipResolverOptions::depends_only(), None).await.unwrap();
	assert!(f.instance.registry().is_installed("B"));
	assert!(!f.instance.registry().is_installed("C"));
}

#[tokio::test]
async fn progress_reaches_total() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), A_FILES).unwrap();
	let mut last = None;
	f.installer()
		.on_progress(|p: &ByteRateProgress| last = Some((p.bytes_done(), p.size)))
		.install_list(vec![a.clone()], &Default::default(), None)
		.await
		.unwrap();
	assert_eq!(last, Some((a.install_size, a.install_size)));
}

#[tokio::test]
async fn archive_escaping_game_directory_is_refused() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), &[("A/a.cfg", b"a"), ("A/../../escaped.txt", b"evil")]).unwrap();
	let before = f.snapshot().unwrap();

	let result = f.installer().install_list(vec![a], &Default::default(), None).await;
	assert!(matches!(result, Err(InstallError::Deployment(DeploymentError::UnsafePath(_)))));
	assert_eq!(f.snapshot().unwrap(), before);
	assert!(!f.game_path().join("../escaped.txt").exists());
	assert!(!f.instance.registry().is_installed("A"));
}

#[tokio::test]
async fn replaced_package_is_swapped_for_replacement() {
	let mut f = Fixture::new().unwrap();
	let user = f.add_package(package("User", "1.0", &["Old"]), &[("User/u.cfg", b"u")]).unwrap();
	let mut old = package("Old", "1.0", &[]);
	old.replaced_by = Some(PackageDescriptor::any("New"));
	let old = f.add_package(old, &[("Old/old.cfg", b"old")]).unwrap();
	f.add_package(providing("New", "Old"), &[("New/new.cfg", b"new")]).unwrap();
	f.installer().install_list(vec![user, old], &Default::default(), None).await.unwrap();

	let replaceable = f.instance.registry().find_replaceable(&f.db).into_iter()
		.map(|(installed, replacement)| (installed.identifier.clone(), replacement.identifier.identifier.clone()))
		.collect::<Vec<_>>();
	assert_eq!(replaceable, [("Old".to_string(), "New".to_string())]);

	let report = f.installer().replace_list(&["Old".to_string()], &Default::default(), None).await.unwrap();
	assert_eq!(report.replaced, [PackageIdentifier::new("Old", "1.0")]);
	assert_eq!(report.installed, [PackageIdentifier::new("New", "1.0")]);
	assert!(!f.game_path().join("GameData/Old").exists());
	assert!(f.game_path().join("GameData/New/new.cfg").is_file());

	let registry = f.instance.registry();
	assert!(!registry.is_installed("Old"));
	assert!(registry.is_installed("User"));
	assert!(registry.check_consistency().is_ok());
}

#[tokio::test]
async fn replacing_without_replacement_changes_nothing() {
	let mut f = Fixture::new().unwrap();
	let a = f.add_package(package("A", "1.0", &[]), A_FILES).unwrap();
	f.installer().install_list(vec![a], &Default::default(), None).await.unwrap();
	let before = f.snapshot().unwrap();

	let result = f.installer().replace_list(&["A".to_string()], &Default::default(), None).await;
	assert!(matches!(result, Err(InstallError::NoReplacement(id)) if id.identifier == "A"));
	let result = f.installer().replace_list(&["Missing".to_string()], &Default::default(), None).await;
	assert!(matches!(result, Err(InstallError::NotInstalled(id)) if id == "Missing"));
	assert_eq!(f.snapshot().unwrap(), before);
	assert!(f.instance.registry().is_installed("A"));
}
