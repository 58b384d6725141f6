use std::collections::BTreeMap;

use tern_core::lockfile::{requirement_hash, Lockfile, LockfileError, FORMAT_VERSION};
use tern_core::marker::MarkerTree;
use tern_core::name::{ExtraName, PackageName};
use tern_core::requirement::{PackageSource, Requirement, RequirementRoot};
use tern_core::solution::{ResolvedPackage, Solution};
use tern_core::specifier::VersionSpecifiers;
use tern_core::version::Version;

fn package(name: &str, version: &str, deps: &[&str]) -> ResolvedPackage {
    let mut pkg = ResolvedPackage::new(
        PackageName::new(name).unwrap(),
        Version::parse(version).unwrap(),
        PackageSource::registry("https://pypi.org/simple"),
    );
    pkg.dependencies = deps.iter().map(|d| d.parse().unwrap()).collect();
    pkg
}

fn sample_solution() -> Solution {
    let linux = MarkerTree::parse(r#"sys_platform == "linux""#).unwrap();
    let other = linux.negate();

    let mut requests = package("requests", "2.31.0", &["certifi", "idna"]);
    requests.optional_dependencies.insert(
        ExtraName::new("socks").unwrap(),
        vec!["pysocks".parse().unwrap()],
    );
    let mut uvloop = package("uvloop", "0.19.0", &[]);
    uvloop.marker = Some(linux.clone());
    let mut numpy_new = package("numpy", "2.0.0", &[]);
    numpy_new.marker = Some(linux.clone());
    let mut numpy_old = package("numpy", "1.26.4", &[]);
    numpy_old.marker = Some(other.clone());

    let mut roots = BTreeMap::new();
    roots.insert(
        RequirementRoot::Runtime,
        vec![
            "requests".parse().unwrap(),
            "numpy".parse().unwrap(),
            r#"uvloop; sys_platform == "linux""#.parse().unwrap(),
        ],
    );
    roots.insert(
        RequirementRoot::DevGroup(ExtraName::new("dev").unwrap()),
        vec!["requests[socks]".parse().unwrap()],
    );

    let mut solution = Solution {
        regions: vec![linux, other],
        roots,
        packages: vec![
            uvloop,
            requests,
            numpy_new,
            numpy_old,
            package("idna", "3.6", &[]),
            package("certifi", "2024.2.2", &[]),
            package("pysocks", "1.7.1", &[]),
        ],
    };
    solution.canonicalize();
    solution
}

#[test]
fn round_trip_serialize_deserialize() {
    let lockfile = Lockfile::new("abc123".to_string(), sample_solution());
    let text = lockfile.serialize().unwrap();
    let back = Lockfile::deserialize(&text).unwrap();
    assert_eq!(back, lockfile);
}

#[test]
fn serialization_is_order_independent() {
    let a = Lockfile::new("h".to_string(), sample_solution());
    let mut shuffled = sample_solution();
    shuffled.packages.reverse();
    let b = Lockfile::new("h".to_string(), shuffled);
    assert_eq!(a.serialize().unwrap(), b.serialize().unwrap());
}

#[test]
fn package_fields_are_written_in_fixed_order() {
    let text = Lockfile::new("h".to_string(), sample_solution())
        .serialize()
        .unwrap();
    let entry = text
        .split("[[package]]")
        .find(|chunk| chunk.contains("name = \"numpy\""))
        .unwrap();
    let positions: Vec<usize> = ["name =", "version =", "marker =", "source =", "dependencies ="]
        .iter()
        .map(|key| entry.find(key).unwrap())
        .collect();
    let mut sorted = positions.clone();
    sorted.sort();
    assert_eq!(positions, sorted);
    assert!(text.starts_with("# This file is generated by tern"));
}

#[test]
fn empty_solution_round_trips() {
    let lockfile = Lockfile::new("empty".to_string(), Solution::default());
    let back = Lockfile::deserialize(&lockfile.serialize().unwrap()).unwrap();
    assert_eq!(back, lockfile);
}

#[test]
fn newer_format_is_rejected() {
    let text = format!(
        "format-version = {}\nrequirement-hash = \"x\"\n",
        FORMAT_VERSION + 1
    );
    assert!(matches!(
        Lockfile::deserialize(&text),
        Err(LockfileError::UnsupportedVersion { .. })
    ));
}

#[test]
fn corrupt_entries_are_rejected() {
    let bad_version = r#"
format-version = 1
requirement-hash = "x"

[[package]]
name = "a"
version = "not a version"
source = "registry+https://pypi.org/simple"
"#;
    assert!(matches!(
        Lockfile::deserialize(bad_version),
        Err(LockfileError::Parse { .. })
    ));
    assert!(matches!(
        Lockfile::deserialize("this is [not toml"),
        Err(LockfileError::Parse { .. })
    ));
    assert!(matches!(
        Lockfile::deserialize("requirement-hash = \"x\""),
        Err(LockfileError::Parse { .. })
    ));
}

#[test]
fn staleness_is_detected() {
    let lockfile = Lockfile::new("h1".to_string(), Solution::default());
    assert!(lockfile.check_fresh("h1").is_ok());
    assert!(matches!(
        lockfile.check_fresh("h2"),
        Err(LockfileError::Stale { .. })
    ));
}

#[test]
fn requirement_hash_ignores_declaration_order() {
    let any = VersionSpecifiers::any();
    let a = Requirement::parse("a>=1").unwrap();
    let b = Requirement::parse("b").unwrap();
    let h1 = requirement_hash(&[a.clone(), b.clone()], &[], &[], &any);
    let h2 = requirement_hash(&[b.clone(), a.clone()], &[], &[], &any);
    assert_eq!(h1, h2);

    let a2 = Requirement::parse("a>=2").unwrap();
    let changed = requirement_hash(&[a2, b.clone()], &[], &[], &any);
    assert_ne!(h1, changed);

    let dev = b.clone().with_origin(RequirementRoot::DevGroup(ExtraName::new("dev").unwrap()));
    assert_ne!(h1, requirement_hash(&[a.clone(), dev], &[], &[], &any));
    assert_ne!(
        h1,
        requirement_hash(&[a.clone()], &[Requirement::parse("b<3").unwrap()], &[], &any)
    );

    let bounded = VersionSpecifiers::parse(">=3.10").unwrap();
    assert_ne!(h1, requirement_hash(&[a, b], &[], &[], &bounded));
}

#[test]
fn write_and_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tern.lock");
    assert!(matches!(
        Lockfile::load(&path),
        Err(LockfileError::Missing { .. })
    ));

    let lockfile = Lockfile::new("h".to_string(), sample_solution());
    lockfile.write(&path).unwrap();
    assert_eq!(Lockfile::load(&path).unwrap(), lockfile);

    let replacement = Lockfile::new("h2".to_string(), Solution::default());
    replacement.write(&path).unwrap();
    assert_eq!(Lockfile::load(&path).unwrap(), replacement);
}
