pub mod crud;
pub mod messages;

use rusqlite::Connection;

/// Resolve the member set of a group. Membership mutation belongs to the
/// storage layer; the real-time subsystem only reads it to compute fan-out
/// recipient sets.
pub fn member_ids(conn: &Connection, group_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT user_id FROM group_members WHERE group_id = ?1")?;
    let ids = stmt
        .query_map([group_id], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}
