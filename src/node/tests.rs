use super::*;
use crate::event::{Command, MemEvent};
use crate::node::core::{CoreState, MemAddr, TaskStep};
use crate::sim::config::NodeParams;

fn make_node(num_cores: usize) -> Node {
    let params = NodeParams { num_cores, instr_per_task: 4, pxn_id: 0 };
    Node::new("node0", &params, 64)
}

fn read_task(addr: MemAddr) -> Task {
    let mut issued = false;
    Box::new(move |_ctx| {
        if issued {
            TaskStep::Done
        } else {
            issued = true;
            TaskStep::ReadMem { addr, size: 8 }
        }
    })
}

fn write_task(addr: MemAddr, data: Vec<u8>) -> Task {
    let mut issued = false;
    Box::new(move |_ctx| {
        if issued {
            TaskStep::Done
        } else {
            issued = true;
            TaskStep::WriteMem { addr, data: data.clone() }
        }
    })
}

#[test]
fn read_stall_emits_dram_request() {
    let mut node = make_node(1);
    let addr = MemAddr { pxn: 0, dram_not_spm: true, offset: 0x80 };
    node.push_task(0, read_task(addr));

    node.tick(0);
    assert_eq!(node.cores[0].state, CoreState::StallMemoryRead);
    let req = node.dram_link.pop_sent().expect("request on dram link");
    assert_eq!(req.cmd, Command::GetS);
    assert_eq!(req.addr, 0x80);
    assert_eq!(req.base_addr, 0x80);
    assert_eq!(req.size, 8);
    assert_eq!(req.src, "node0");
}

#[test]
fn spm_and_remote_requests_route_by_address() {
    let mut node = make_node(2);
    node.push_task(0, read_task(MemAddr { pxn: 0, dram_not_spm: false, offset: 0x40 }));
    node.push_task(1, read_task(MemAddr { pxn: 3, dram_not_spm: true, offset: 0x40 }));

    node.tick(0);
    assert!(node.spm_link.pop_sent().is_some(), "core 0 request goes to the scratchpad");
    assert!(node.remote_link.pop_sent().is_some(), "core 1 request goes to the remote node");
    assert!(node.dram_link.pop_sent().is_none());
}

#[test]
fn read_response_unblocks_core_with_data() {
    let mut node = make_node(1);
    node.push_task(0, read_task(MemAddr { pxn: 0, dram_not_spm: true, offset: 0 }));
    node.tick(0);
    let req = node.dram_link.pop_sent().unwrap();

    let mut resp = req.make_response_cmd(Command::GetSResp);
    resp.payload = vec![1, 2, 3, 4, 5, 6, 7, 8];
    node.handle_response(resp);

    assert_eq!(node.cores[0].state, CoreState::Ready);
    assert_eq!(node.cores[0].last_read(), Some(&[1, 2, 3, 4, 5, 6, 7, 8][..]));

    // next tick finishes the task
    node.tick(1);
    assert!(node.all_idle());
}

#[test]
fn write_response_completes_core() {
    let mut node = make_node(1);
    node.push_task(0, write_task(MemAddr { pxn: 0, dram_not_spm: true, offset: 0x40 }, vec![9; 8]));
    node.tick(0);
    assert_eq!(node.cores[0].state, CoreState::StallMemoryWrite);
    let req = node.dram_link.pop_sent().unwrap();
    assert_eq!(req.cmd, Command::Write);
    assert_eq!(req.payload, vec![9; 8]);

    node.handle_response(req.make_response_cmd(Command::WriteResp));
    assert_eq!(node.cores[0].state, CoreState::Ready);
}

#[test]
fn nacked_dram_request_retries_on_dram_link() {
    let mut node = make_node(1);
    node.push_task(0, read_task(MemAddr { pxn: 0, dram_not_spm: true, offset: 0x40 }));
    node.tick(0);
    let req = node.dram_link.pop_sent().unwrap();

    node.handle_response(req.make_nack_response());
    let retry = node.dram_link.pop_sent().expect("retry goes back out on the dram link");
    assert_eq!(retry.id, req.id);
    assert_eq!(retry.cmd, Command::GetS);
    // The core stays blocked until the real response lands
    assert_eq!(node.cores[0].state, CoreState::StallMemoryRead);

    let mut resp = retry.make_response_cmd(Command::GetSResp);
    resp.payload = vec![0; 8];
    node.handle_response(resp);
    assert_eq!(node.cores[0].state, CoreState::Ready);
}

#[test]
fn nacked_requests_retry_on_their_originating_links() {
    let mut node = make_node(2);
    node.push_task(0, read_task(MemAddr { pxn: 0, dram_not_spm: false, offset: 0x80 }));
    node.push_task(1, write_task(MemAddr { pxn: 5, dram_not_spm: true, offset: 0x40 }, vec![7; 8]));
    node.tick(0);
    let spm_req = node.spm_link.pop_sent().unwrap();
    let remote_req = node.remote_link.pop_sent().unwrap();

    node.handle_response(spm_req.make_nack_response());
    node.handle_response(remote_req.make_nack_response());

    assert!(node.dram_link.pop_sent().is_none(), "no retry may leak onto the dram link");
    assert_eq!(node.spm_link.pop_sent().unwrap().id, spm_req.id);
    assert_eq!(node.remote_link.pop_sent().unwrap().id, remote_req.id);
}

#[test]
#[should_panic(expected = "NACK matches no pending request")]
fn orphan_nack_is_fatal() {
    let mut node = make_node(1);
    let stray = MemEvent::new("dir0", 0x40, 0x40, Command::GetS, 8);
    node.handle_response(stray.make_nack_response());
}

#[test]
fn peer_requests_are_serviced_in_place() {
    let mut node = make_node(1);

    let mut write = MemEvent::new("node1", 0x100, 0x100, Command::Write, 4);
    write.dst = "node0".to_string();
    write.payload = vec![0xde, 0xad, 0xbe, 0xef];
    let resp = node.handle_request(write);
    assert_eq!(resp.cmd, Command::WriteResp);
    assert_eq!(resp.dst, "node1");

    let mut read = MemEvent::new("node1", 0x100, 0x100, Command::GetS, 4);
    read.dst = "node0".to_string();
    let resp = node.handle_request(read);
    assert_eq!(resp.cmd, Command::GetSResp);
    assert_eq!(resp.payload, vec![0xde, 0xad, 0xbe, 0xef]);
}

#[test]
fn cores_drain_their_task_deques() {
    let mut node = make_node(1);
    node.push_task(0, read_task(MemAddr { pxn: 0, dram_not_spm: false, offset: 0 }));
    node.push_task(0, read_task(MemAddr { pxn: 0, dram_not_spm: false, offset: 64 }));

    for cycle in 0..16 {
        node.tick(cycle);
        while let Some(req) = node.spm_link.pop_sent() {
            let mut resp = req.make_response_cmd(Command::GetSResp);
            resp.payload = vec![0; 8];
            node.handle_response(resp);
        }
        if node.all_idle() {
            return;
        }
    }
    panic!("node did not drain its tasks");
}

#[test]
#[should_panic(expected = "no pending request")]
fn orphan_response_is_fatal() {
    let mut node = make_node(1);
    let stray = MemEvent::new("mem0", 0, 0, Command::GetS, 8);
    let resp = stray.make_response_cmd(Command::GetSResp);
    node.handle_response(resp);
}
