//! Observable session state, pinned as JSON.

use showroom_harness::{InvariantRegistry, SimDriver};
use showroom_proto::{RoomId, UserId};

#[test]
fn unread_message_in_closed_room() {
    let mut driver = SimDriver::new(42).with_invariants(InvariantRegistry::standard());
    let lobby = RoomId::from("lobby");
    driver.server_mut().create_room(&lobby, &[UserId::from("alice"), UserId::from("bob")]);
    driver.sign_in("alice", "alice-token");

    driver.server_mut().post(&lobby, &UserId::from("bob"), "hi");
    driver.run_until_idle();

    insta::assert_json_snapshot!(driver.snapshot(), @r###"
    {
      "user": "alice",
      "connection": "Connected",
      "active_room": null,
      "unread_total": 1,
      "unread": {
        "lobby": 1
      },
      "rooms": [
        {
          "id": "lobby",
          "unread": 1,
          "stale": false,
          "history_loaded": false,
          "messages": [
            {
              "id": "msg-1",
              "seq": 1,
              "status": "sent"
            }
          ]
        }
      ]
    }
    "###);
}
