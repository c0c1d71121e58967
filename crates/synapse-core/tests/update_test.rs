mod common;

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use common::{Fixture, UI};
use synapse_cas::BlobHash;
use synapse_core::{CoreError, PlanEntry};
use synapse_pack::{AssetType, Pack, UpdatePolicy};

const LORA: &str = "models/loras/style.safetensors";

fn following_pack(fx: &Fixture) {
    let dep = fx
        .asset("style", AssetType::Lora, "style.safetensors", b"style v1")
        .with_policy(UpdatePolicy::FollowLatest);
    fx.install("styles", vec![dep]);
}

#[test]
fn test_determined_update_dry_run_matches_real_run() {
    let fx = Fixture::new();
    following_pack(&fx);
    fx.lib.profiles().use_pack("styles", UI).unwrap();
    fx.catalog
        .publish("style", fx.candidate("v2", 2, "style.safetensors", b"style v2"));

    let plan = fx.lib.updates().check("styles").unwrap();
    assert!(plan.has_updates());
    assert!(matches!(
        &plan.entries[0],
        PlanEntry::Determined { candidate, .. } if candidate.id == "v2"
    ));

    let no_choices = BTreeMap::new();
    let dry = fx.lib.updates().apply("styles", &plan, &no_choices, true).unwrap();
    assert!(dry.dry_run);
    assert!(!fx.lib.blobs().has(&BlobHash::of_bytes(b"style v2")));
    assert_eq!(fx.read_active(LORA), b"style v1");

    let real = fx.lib.updates().apply("styles", &plan, &no_choices, false).unwrap();
    assert_eq!(real.pins, dry.pins);
    assert_eq!(real.changes, dry.changes);
    assert_eq!(real.pins["style"], BlobHash::of_bytes(b"style v2"));

    assert!(real
        .rebuilt
        .contains(&(UI.to_string(), "work__styles".to_string())));
    assert_eq!(fx.read_active(LORA), b"style v2");
    assert!(fx.lib.profiles().status(UI).unwrap().consistent);

    // The new version is now current
    let plan = fx.lib.updates().check("styles").unwrap();
    assert!(!plan.has_updates());
}

#[test]
fn test_ambiguous_update_needs_a_valid_choice() {
    let fx = Fixture::new();
    following_pack(&fx);

    let mut newest_version = fx.candidate("a", 3, "style.safetensors", b"style a");
    newest_version.published_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let mut newest_date = fx.candidate("b", 2, "style.safetensors", b"style b");
    newest_date.published_at = Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    fx.catalog.publish("style", newest_version);
    fx.catalog.publish("style", newest_date);

    let plan = fx.lib.updates().check("styles").unwrap();
    assert_eq!(plan.ambiguous().count(), 1);

    let err = fx
        .lib
        .updates()
        .apply("styles", &plan, &BTreeMap::new(), false)
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::AmbiguousUpdateRequiresChoice { ref dependencies, .. } if dependencies == &vec!["style".to_string()]
    ));

    let bogus = BTreeMap::from([("style".to_string(), "zzz".to_string())]);
    let err = fx.lib.updates().apply("styles", &plan, &bogus, false).unwrap_err();
    assert!(matches!(err, CoreError::UnknownCandidate { .. }));

    // Nothing was touched by the refused attempts
    assert_eq!(fx.read_active(LORA), b"style v1");

    let choice = BTreeMap::from([("style".to_string(), "b".to_string())]);
    let result = fx.lib.updates().apply("styles", &plan, &choice, false).unwrap();
    assert_eq!(result.pins["style"], BlobHash::of_bytes(b"style b"));
    assert_eq!(fx.read_active(LORA), b"style b");
}

#[test]
fn test_pinned_dependencies_are_not_checked() {
    let fx = Fixture::new();
    fx.install(
        "fixed",
        vec![fx.asset("style", AssetType::Lora, "style.safetensors", b"style v1")],
    );
    fx.catalog
        .publish("style", fx.candidate("v2", 2, "style.safetensors", b"style v2"));

    let plan = fx.lib.updates().check("fixed").unwrap();
    assert!(plan.entries.is_empty());
    assert!(!plan.has_updates());
}

#[test]
fn test_check_requires_installed_pack() {
    let fx = Fixture::new();
    let dep = fx.asset("style", AssetType::Lora, "style.safetensors", b"style v1");
    fx.lib
        .import_pack(Pack::new("styles").with_dependency(dep), false)
        .unwrap();

    let err = fx.lib.updates().check("styles").unwrap_err();
    assert!(matches!(err, CoreError::PackNotInstalled(_)));
}

#[test]
fn test_stale_plan_is_refused() {
    let fx = Fixture::new();
    following_pack(&fx);
    fx.lib.profiles().use_pack("styles", UI).unwrap();
    fx.catalog
        .publish("style", fx.candidate("v2", 2, "style.safetensors", b"style v2"));
    let old_plan = fx.lib.updates().check("styles").unwrap();

    fx.catalog
        .publish("style", fx.candidate("v3", 3, "style.safetensors", b"style v3"));
    let plan = fx.lib.updates().check("styles").unwrap();
    fx.lib
        .updates()
        .apply("styles", &plan, &BTreeMap::new(), false)
        .unwrap();
    assert_eq!(fx.read_active(LORA), b"style v3");

    for dry_run in [true, false] {
        let err = fx
            .lib
            .updates()
            .apply("styles", &old_plan, &BTreeMap::new(), dry_run)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::StalePlan { ref dependencies, .. } if dependencies == &vec!["style".to_string()]
        ));
    }
    assert_eq!(fx.read_active(LORA), b"style v3");
    assert_eq!(
        fx.lib.get_lock("styles").unwrap()["style"].sha256,
        BlobHash::of_bytes(b"style v3")
    );
}

#[test]
fn test_candidate_filename_outside_view_is_rejected() {
    let fx = Fixture::new();
    following_pack(&fx);
    fx.lib.profiles().use_pack("styles", UI).unwrap();

    let sources = fx.env.create_file("marker", b"").unwrap();
    let outside = sources.with_file_name("ESCAPED.safetensors");
    let mut candidate = fx.candidate("v2", 2, "style.safetensors", b"style v2");
    candidate.filename = outside.display().to_string();
    fx.catalog.publish("style", candidate);

    let plan = fx.lib.updates().check("styles").unwrap();
    let err = fx
        .lib
        .updates()
        .apply("styles", &plan, &BTreeMap::new(), false)
        .unwrap_err();
    assert!(matches!(err, CoreError::Unresolvable { ref dependency, .. } if dependency == "style"));

    assert!(!outside.exists());
    assert!(!fx.lib.blobs().has(&BlobHash::of_bytes(b"style v2")));
    assert_eq!(fx.read_active(LORA), b"style v1");
}

#[test]
fn test_apply_requires_installed_pack() {
    let fx = Fixture::new();
    following_pack(&fx);
    fx.catalog
        .publish("style", fx.candidate("v2", 2, "style.safetensors", b"style v2"));
    let plan = fx.lib.updates().check("styles").unwrap();

    // Re-declaring drops the pins
    let dep = fx
        .asset("style", AssetType::Lora, "style.safetensors", b"style v1")
        .with_policy(UpdatePolicy::FollowLatest);
    fx.lib
        .import_pack(Pack::new("styles").with_dependency(dep), true)
        .unwrap();

    let err = fx
        .lib
        .updates()
        .apply("styles", &plan, &BTreeMap::new(), false)
        .unwrap_err();
    assert!(matches!(err, CoreError::PackNotInstalled(ref p) if p == "styles"));
}
