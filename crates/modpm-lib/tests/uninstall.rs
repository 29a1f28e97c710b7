use modpm::installation::UninstallError;
use modpm::installation::progress::Prompt;
use modpm::metadb::package::*;
use modpm_test_utils::{package, Fixture};
use tokio_util::sync::CancellationToken;

fn ids(identifiers: &[&str]) -> Vec<String> {
	identifiers.iter().map(|s| s.to_string()).collect()
}

fn removed(report: &modpm::installation::UninstallReport) -> Vec<&str> {
	report.removed.iter().map(|p| p.identifier.as_str()).collect()
}

/// Catalog of `A` and `C` both depending on `B`, nothing installed.
fn shared_dependency() -> Fixture {
	let mut f = Fixture::new().unwrap();
	f.add_package(package("A", "1.0", &["B"]), &[("A/a.cfg", b"a"), ("A/Plugins/a.dll", b"dll")]).unwrap();
	f.add_package(package("B", "1.0", &[]), &[("B/b.cfg", b"b")]).unwrap();
	f.add_package(package("C", "1.0", &["B"]), &[("C/c.cfg", b"c")]).unwrap();
	f
}

async fn install(f: &mut Fixture, identifiers: &[&str]) {
	let targets = identifiers.iter().filter_map(|i| f.latest(i)).collect::<Vec<_>>();
	f.installer().install_list(targets, &Default::default(), None).await.unwrap();
}

#[tokio::test]
async fn install_then_uninstall_restores_directory() {
	let mut f = shared_dependency();
	let before = f.snapshot().unwrap();

	install(&mut f, &["A"]).await;
	assert_ne!(f.snapshot().unwrap(), before);

	let report = f.installer().uninstall_list(&ids(&["A"]), &[]).unwrap();
	assert_eq!(removed(&report), ["A", "B"]);
	assert!(report.possible_leftover_dirs.is_empty());
	assert_eq!(f.snapshot().unwrap(), before);
	assert_eq!(f.instance.registry().installed_packages().count(), 0);
}

#[tokio::test]
async fn sole_auto_dependency_is_removed() {
	let mut f = shared_dependency();
	install(&mut f, &["A"]).await;
	f.installer().uninstall_list(&ids(&["A"]), &[]).unwrap();
	assert!(!f.instance.registry().is_installed("B"));
	assert!(!f.game_path().join("GameData/B").exists());
}

#[tokio::test]
async fn shared_auto_dependency_is_kept() {
	let mut f = shared_dependency();
	install(&mut f, &["A", "C"]).await;

	let report = f.installer().uninstall_list(&ids(&["A"]), &[]).unwrap();
	assert_eq!(removed(&report), ["A"]);
	assert!(f.instance.registry().is_installed("B"));
	assert!(f.game_path().join("GameData/B/b.cfg").is_file());
}

#[tokio::test]
async fn explicit_dependency_is_kept() {
	let mut f = shared_dependency();
	install(&mut f, &["B"]).await;
	install(&mut f, &["A"]).await;

	f.installer().uninstall_list(&ids(&["A"]), &[]).unwrap();
	assert!(f.instance.registry().is_installed("B"));
}

#[tokio::test]
async fn dependents_are_removed_first() {
	let mut f = shared_dependency();
	install(&mut f, &["A", "C"]).await;

	let report = f.installer().uninstall_list(&ids(&["B"]), &[]).unwrap();
	assert_eq!(report.removed.len(), 3);
	assert_eq!(removed(&report).last(), Some(&"B"));
	assert_eq!(f.instance.registry().installed_packages().count(), 0);
}

#[tokio::test]
async fn dependents_are_kept_when_replacement_is_installing() {
	let mut f = shared_dependency();
	install(&mut f, &["A"]).await;
	let replacement = f.latest("B").unwrap();

	let report = f.installer().uninstall_list(&ids(&["B"]), &[replacement]).unwrap();
	assert_eq!(removed(&report), ["B"]);
	assert!(f.instance.registry().is_installed("A"));
}

#[tokio::test]
async fn auto_dependency_of_installing_package_is_kept() {
	let mut f = shared_dependency();
	install(&mut f, &["A"]).await;
	let upgrade = package("A", "2.0", &["B"]);

	let report = f.installer().uninstall_list(&ids(&["A"]), &[upgrade]).unwrap();
	assert_eq!(removed(&report), ["A"]);
	assert!(f.instance.registry().is_installed("B"));
	assert!(f.game_path().join("GameData/B/b.cfg").is_file());
}

#[tokio::test]
async fn locked_file_keeps_package_and_its_dependencies() {
	let mut f = shared_dependency();
	install(&mut f, &["A"]).await;
	let locked = f.game_path().join("GameData/A/a.cfg");
	std::fs::remove_file(&locked).unwrap();
	std::fs::create_dir_all(&locked).unwrap();
	std::fs::write(locked.join("inner.cfg"), "in the way").unwrap();

	let result = f.installer().uninstall_list(&ids(&["A"]), &[]);
	let Err(UninstallError::PartialFailure { locked, report }) = result else { panic!("expected a partial failure") };
	assert_eq!(locked, ["GameData/A/a.cfg"]);
	assert!(report.removed.is_empty());
	assert!(!f.game_path().join("GameData/A/Plugins").exists());

	let registry = f.instance.registry();
	assert_eq!(registry.installed_package("A").unwrap().files().iter().collect::<Vec<_>>(), ["GameData/A/a.cfg"]);
	assert!(registry.is_installed("B"));
	assert!(registry.check_consistency().is_ok());

	install(&mut f, &["C"]).await;
	assert!(f.instance.registry().is_installed("C"));
}

#[tokio::test]
async fn dlc_cant_be_uninstalled() {
	let mut f = Fixture::new().unwrap();
	let mut dlc = Package::new("Expansion", "1.0");
	dlc.kind = Kind::DLC;
	f.instance.register_dlc(dlc).unwrap();

	let result = f.installer().uninstall_list(&ids(&["Expansion"]), &[]);
	assert!(matches!(result, Err(UninstallError::Forbidden(id)) if id.identifier == "Expansion"));
	assert!(f.instance.registry().is_installed("Expansion"));
}

#[tokio::test]
async fn removal_is_confirmed_with_full_list() {
	let mut f = shared_dependency();
	install(&mut f, &["A"]).await;

	let mut asked = Vec::<Prompt>::new();
	let result = f.installer()
		.on_confirm(|p: &Prompt| { asked.push(p.clone()); false })
		.uninstall_list(&ids(&["A"]), &[]);
	assert!(matches!(result, Err(UninstallError::Cancelled)));

	let Some(Prompt::ContinueRemove { packages }) = asked.first() else { panic!("expected a removal prompt") };
	assert_eq!(packages.len(), 2);
	assert!(f.instance.registry().is_installed("A"));
}

#[tokio::test]
async fn uninstalling_unknown_package_fails() {
	let mut f = shared_dependency();
	let result = f.installer().uninstall_list(&ids(&["A"]), &[]);
	assert!(matches!(result, Err(UninstallError::NotInstalled(id)) if id == "A"));
}

#[tokio::test]
async fn unowned_files_keep_directory() {
	let mut f = shared_dependency();
	install(&mut f, &["A"]).await;
	std::fs::write(f.game_path().join("GameData/A/settings.cfg"), "user").unwrap();

	let report = f.installer().uninstall_list(&ids(&["A"]), &[]).unwrap();
	assert_eq!(report.possible_leftover_dirs, [f.game_path().join("GameData/A")]);
	assert!(f.game_path().join("GameData/A/settings.cfg").is_file());
	assert!(!f.game_path().join("GameData/A/a.cfg").exists());
	assert!(!f.game_path().join("GameData/A/Plugins").exists());
}

#[tokio::test]
async fn game_generated_folders_dont_keep_directory() {
	let mut f = shared_dependency();
	install(&mut f, &["A"]).await;
	std::fs::create_dir_all(f.game_path().join("GameData/A/@thumbs")).unwrap();
	std::fs::write(f.game_path().join("GameData/A/@thumbs/a.png"), "thumb").unwrap();

	let report = f.installer().uninstall_list(&ids(&["A"]), &[]).unwrap();
	assert!(report.possible_leftover_dirs.is_empty());
	assert!(!f.game_path().join("GameData/A").exists());
}

#[tokio::test]
async fn reserved_directories_are_never_removed() {
	let mut f = Fixture::new().unwrap();
	let mut a = package("A", "1.0", &[]);
	a.install = vec![InstallDirective::new(SourceDirective::File("A/a.craft".to_string()), "Ships/VAB", Vec::new())];
	f.add_package(a, &[("A/a.craft", b"craft")]).unwrap();
	install(&mut f, &["A"]).await;
	assert!(f.game_path().join("Ships/VAB/a.craft").is_file());

	f.installer().uninstall_list(&ids(&["A"]), &[]).unwrap();
	assert!(f.game_path().join("Ships/VAB").is_dir());
}

#[tokio::test]
async fn cancelled_uninstall_changes_nothing() {
	let mut f = shared_dependency();
	install(&mut f, &["A"]).await;
	let before = f.snapshot().unwrap();

	let token = CancellationToken::new();
	token.cancel();
	let result = f.installer().cancellation_token(token).uninstall_list(&ids(&["A"]), &[]);
	assert!(matches!(result, Err(UninstallError::Cancelled)));
	assert_eq!(f.snapshot().unwrap(), before);
	assert!(f.instance.registry().is_installed("A"));
}

#[tokio::test]
async fn file_already_gone_is_not_an_error() {
	let mut f = shared_dependency();
	install(&mut f, &["A"]).await;
	std::fs::remove_file(f.game_path().join("GameData/A/a.cfg")).unwrap();

	f.installer().uninstall_list(&ids(&["A"]), &[]).unwrap();
	assert!(!f.instance.registry().is_installed("A"));
	assert!(!f.game_path().join("GameData/A").exists());
}
