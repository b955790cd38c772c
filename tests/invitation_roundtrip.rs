//! Invitations: a sealed circle key round-trips through the envelope file
//! and only the matching private key can open it.

use chora::invitation::{self, generate_keypair, Invitation};
use tempfile::TempDir;

#[test]
fn sealed_key_round_trips_through_the_file() {
    let tmp = TempDir::new().expect("tempdir");
    let access_dir = tmp.path().join(".chora").join("access");
    let (secret, public) = generate_keypair();
    let circle_key = b"the-circle-symmetric-key-32-byte";

    let invitation = Invitation::create("ada", "circle-shared", circle_key, &public).unwrap();
    let path = invitation.to_file(&access_dir).unwrap();
    assert!(path.ends_with("circle-shared/ada.enc"));

    let loaded = Invitation::from_file(&path).unwrap();
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.username, "ada");
    assert_eq!(loaded.circle_id, "circle-shared");
    assert_eq!(loaded.accept(&secret).unwrap(), circle_key);
}

#[test]
fn any_other_key_fails_to_open() {
    let (_secret, public) = generate_keypair();
    let (stranger_secret, _) = generate_keypair();

    let invitation = Invitation::create("ada", "circle-shared", b"circle-key", &public).unwrap();
    assert!(invitation.accept(&stranger_secret).is_err());
}

#[test]
fn the_envelope_never_leaks_the_key() {
    let (_secret, public) = generate_keypair();
    let circle_key = b"recognizable-plaintext-material!";
    let invitation = Invitation::create("ada", "circle-shared", circle_key, &public).unwrap();
    let serialized = serde_json::to_string(&invitation).unwrap();
    assert!(!serialized.contains("recognizable-plaintext"));
}

#[test]
fn members_are_listed_from_the_access_dir() {
    let tmp = TempDir::new().expect("tempdir");
    let access_dir = tmp.path().join("access");
    let (_, public) = generate_keypair();

    for username in ["ada", "grace"] {
        Invitation::create(username, "circle-shared", b"key", &public)
            .unwrap()
            .to_file(&access_dir)
            .unwrap();
    }

    assert_eq!(
        invitation::list_members(&access_dir, "circle-shared").unwrap(),
        vec!["ada".to_string(), "grace".to_string()]
    );
    assert!(invitation::list_members(&access_dir, "circle-empty")
        .unwrap()
        .is_empty());
}
