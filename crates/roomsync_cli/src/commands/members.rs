//! Members command implementation.

use super::open_account;
use roomsync_store::Indexer;
use roomsync_types::{RoomId, UserId};
use std::path::Path;

/// Runs the members command.
pub fn run(path: &Path, room: &str, prefix: &str) -> Result<(), Box<dyn std::error::Error>> {
    let account = open_account(path)?;
    let room = RoomId::from(room);
    let found = search(account.index(), &room, prefix);
    account.close()?;

    if found.is_empty() {
        println!("No members of {} match {:?}", room, prefix);
        return Ok(());
    }
    for (user, name) in &found {
        match name {
            Some(name) => println!("{}  {}", user, name),
            None => println!("{}", user),
        }
    }
    println!();
    println!("{} member(s)", found.len());
    Ok(())
}

/// Members matching `prefix` with their display names. An empty prefix
/// lists every indexed member.
fn search(index: &Indexer, room: &RoomId, prefix: &str) -> Vec<(UserId, Option<String>)> {
    if prefix.is_empty() {
        return index
            .entries(room)
            .into_iter()
            .map(|e| (e.user, e.display_name))
            .collect();
    }
    index
        .lookup_prefix(room, prefix)
        .into_iter()
        .map(|user| {
            let name = index.display_name(room, &user);
            (user, name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::seed_account;

    #[test]
    fn finds_members_by_any_name_word() {
        let temp = tempfile::tempdir().unwrap();
        seed_account(temp.path());
        let account = open_account(temp.path()).unwrap();
        let room = RoomId::from("!lobby:example.org");

        let found = search(account.index(), &room, "lid");
        assert_eq!(
            found,
            vec![(
                UserId::from("@alice:example.org"),
                Some("Alice Liddell".to_string())
            )]
        );
        assert_eq!(search(account.index(), &room, "").len(), 1);
        assert!(search(account.index(), &room, "bob").is_empty());
    }
}
