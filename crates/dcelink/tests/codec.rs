//! Codec instance operations against the simulated remote server.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{
    BYTES_CONSUMED_OFFSET, ENGINE_NAME, EXTENDED_ERROR_OFFSET, Harness, MockChannel,
    MockConnector, VERSION, message_addr,
};
use dcelink::family::{IVIDEO2_BUF_DESC, XDM2_BUF_DESC};
use dcelink::message::{CodecGetVersionMsg, EngineOpenMsg, FxnId, Message};
use dcelink::xdm::BufDescWriter;
use dcelink::{
    CodecFamily, Dce, DceConfig, DceError, DceStatus, Viddec3, Videnc2, XdmCmd, XdmStatus,
};
use dcelink_memplugin::{MmapArena, RemoteAccess, SharedMemory};
use dcelink_mmrpc::MmRpcError;

#[test]
fn decoder_lifecycle() {
    let h = Harness::new();
    let engine = h.dce.open_engine(ENGINE_NAME).unwrap().handle;
    let dec = Viddec3::new(&h.dce);

    let params = h.params(64);
    let codec = dec.create(engine, "ivahd_h264dec", &params).unwrap();
    assert_eq!(codec.family(), CodecFamily::Viddec3);

    let dyn_params = h.params(32);
    let status = h.params(128);
    let ret = dec
        .control(codec, XdmCmd::SetParams, &dyn_params, &status)
        .unwrap();
    assert!(ret.is_ok());
    // The remote wrote through the translated status pointer
    assert_eq!(
        status.read_i32(EXTENDED_ERROR_OFFSET as usize),
        Some(XdmCmd::SetParams.id())
    );

    dec.delete(codec).unwrap();
    h.dce.close_engine(engine).unwrap();

    for buf in [params, dyn_params, status] {
        h.dce.free_params(buf).unwrap();
    }
    let stats = h.arena.stats();
    assert_eq!(stats.allocs, stats.frees);
}

#[test]
fn get_version_is_routed_for_both_families() {
    let h = Harness::new();
    let engine = h.dce.open_engine(ENGINE_NAME).unwrap().handle;
    let params = h.params(64);

    let dec = Viddec3::new(&h.dce)
        .create(engine, "ivahd_h264dec", &params)
        .unwrap();
    let enc = Videnc2::new(&h.dce)
        .create(engine, "ivahd_h264enc", &params)
        .unwrap();

    for codec in [dec, enc] {
        let dyn_params = h.params(32);
        let mut status = h.params(128);
        let version = h.buffer(64);

        let offset = codec.family().layout().status_version_offset;
        status.write_u64(offset, version.addr()).unwrap();
        let ret = h
            .dce
            .control_codec(codec, XdmCmd::GetVersion, &dyn_params, &status)
            .unwrap();
        assert_eq!(ret, XdmStatus::Ok);
        assert_eq!(&version.as_slice()[..VERSION.len()], VERSION);

        // The status field keeps the host address after the call
        assert_eq!(status.read_u64(offset), Some(version.addr()));

        h.arena.free(version).unwrap();
        h.dce.free_params(dyn_params).unwrap();
        h.dce.free_params(status).unwrap();
    }

    h.dce.close_engine(engine).unwrap();
}

#[test]
fn get_version_requires_a_version_buffer() {
    let h = Harness::new();
    let engine = h.dce.open_engine(ENGINE_NAME).unwrap().handle;
    let params = h.params(64);
    let codec = h
        .dce
        .create_codec(engine, "ivahd_h264dec", &params, CodecFamily::Viddec3)
        .unwrap();
    let allocs = h.arena.stats().allocs;

    let dyn_params = h.params(32);
    let status = h.params(128);
    let err = h.dce.get_version(codec, &dyn_params, &status).unwrap_err();
    assert_eq!(err.status(), DceStatus::InvalidInput);

    let short = h.params(4);
    assert!(matches!(
        h.dce.get_version(codec, &dyn_params, &short),
        Err(DceError::InvalidInput(_))
    ));
    // Only the three parameter blocks above were allocated
    assert_eq!(h.arena.stats().allocs, allocs + 3);

    h.dce.close_engine(engine).unwrap();
}

#[test]
fn rejected_create_reports_codec_name() {
    let h = Harness::new();
    let engine = h.dce.open_engine(ENGINE_NAME).unwrap().handle;

    // A zero size field makes the simulated server refuse the instance
    let params = h.dce.alloc_params(64).unwrap();
    let err = h
        .dce
        .create_codec(engine, "ivahd_mpeg4dec", &params, CodecFamily::Viddec3)
        .unwrap_err();
    assert!(matches!(err, DceError::CodecRejected { ref name } if name == "ivahd_mpeg4dec"));
    assert_eq!(err.status(), DceStatus::XdmFail);

    h.dce.close_engine(engine).unwrap();
}

#[test]
fn family_mismatch_is_invalid_input() {
    let h = Harness::new();
    let engine = h.dce.open_engine(ENGINE_NAME).unwrap().handle;
    let params = h.params(64);
    let codec = Videnc2::new(&h.dce)
        .create(engine, "ivahd_h264enc", &params)
        .unwrap();

    let err = Viddec3::new(&h.dce).delete(codec).unwrap_err();
    assert_eq!(err.status(), DceStatus::InvalidInput);
    Videnc2::new(&h.dce).delete(codec).unwrap();

    h.dce.close_engine(engine).unwrap();
}

#[test]
fn decoder_process_translates_every_slot() {
    let h = Harness::new();
    let engine = h.dce.open_engine(ENGINE_NAME).unwrap().handle;
    let params = h.params(64);
    let dec = Viddec3::new(&h.dce);
    let codec = dec.create(engine, "ivahd_h264dec", &params).unwrap();

    let mut bitstream = h.buffer(16);
    bitstream.write_bytes(0, b"0123456789abcdef").unwrap();
    let frame = h.buffer(32);
    let meta = h.buffer(8);

    let mut in_desc = h.buffer(XDM2_BUF_DESC.size);
    BufDescWriter::new(XDM2_BUF_DESC)
        .buffer(&bitstream)
        .write(&mut in_desc)
        .unwrap();
    let mut out_desc = h.buffer(XDM2_BUF_DESC.size);
    BufDescWriter::new(XDM2_BUF_DESC)
        .buffer(&frame)
        .buffer(&meta)
        .write(&mut out_desc)
        .unwrap();
    let in_args = h.buffer(CodecFamily::Viddec3.layout().in_args_size);
    let out_args = h.buffer(CodecFamily::Viddec3.layout().out_args_size);

    let allocs = h.arena.stats().allocs;
    let ret = dec
        .process(codec, &in_desc, &out_desc, &in_args, &out_args)
        .unwrap();
    assert_eq!(ret, XdmStatus::Ok);
    assert_eq!(&frame.as_slice()[..16], b"0123456789abcdef");
    assert_eq!(out_args.read_i32(BYTES_CONSUMED_OFFSET as usize), Some(16));
    // Process runs entirely on caller memory
    assert_eq!(h.arena.stats().allocs, allocs);
    // Descriptors hold host addresses again
    assert_eq!(in_desc.read_u64(XDM2_BUF_DESC.slot_field(0)), Some(bitstream.addr()));

    dec.delete(codec).unwrap();
    h.dce.close_engine(engine).unwrap();
}

#[test]
fn encoder_process_uses_plane_descriptor() {
    let h = Harness::new();
    let engine = h.dce.open_engine(ENGINE_NAME).unwrap().handle;
    let params = h.params(64);
    let enc = Videnc2::new(&h.dce);
    let codec = enc.create(engine, "ivahd_h264enc", &params).unwrap();

    let mut luma = h.buffer(8);
    luma.write_bytes(0, b"YYYYYYYY").unwrap();
    let mut chroma = h.buffer(4);
    chroma.write_bytes(0, b"UVUV").unwrap();
    let bitstream = h.buffer(64);

    let mut in_desc = h.buffer(IVIDEO2_BUF_DESC.size);
    BufDescWriter::new(IVIDEO2_BUF_DESC)
        .buffer(&luma)
        .buffer(&chroma)
        .write(&mut in_desc)
        .unwrap();
    let mut out_desc = h.buffer(XDM2_BUF_DESC.size);
    BufDescWriter::new(XDM2_BUF_DESC)
        .buffer(&bitstream)
        .write(&mut out_desc)
        .unwrap();
    let in_args = h.buffer(CodecFamily::Videnc2.layout().in_args_size);
    let out_args = h.buffer(CodecFamily::Videnc2.layout().out_args_size);

    let ret = enc
        .process(codec, &in_desc, &out_desc, &in_args, &out_args)
        .unwrap();
    assert!(ret.is_ok());
    assert_eq!(&bitstream.as_slice()[..12], b"YYYYYYYYUVUV");
    assert_eq!(out_args.read_i32(BYTES_CONSUMED_OFFSET as usize), Some(12));

    enc.delete(codec).unwrap();
    h.dce.close_engine(engine).unwrap();
}

#[test]
fn process_rejects_bad_descriptors_without_calling() {
    let h = Harness::new();
    let engine = h.dce.open_engine(ENGINE_NAME).unwrap().handle;
    let params = h.params(64);
    let codec = h
        .dce
        .create_codec(engine, "ivahd_h264enc", &params, CodecFamily::Videnc2)
        .unwrap();

    let mut in_desc = h.buffer(IVIDEO2_BUF_DESC.size);
    in_desc.write_i32(0, 4).unwrap();
    let out_desc = h.buffer(XDM2_BUF_DESC.size);
    let in_args = h.buffer(64);
    let out_args = h.buffer(1024);

    let err = h
        .dce
        .process(codec, &in_desc, &out_desc, &in_args, &out_args)
        .unwrap_err();
    assert_eq!(err.status(), DceStatus::InvalidInput);

    in_desc.write_i32(0, 1).unwrap();
    let tiny = h.buffer(4);
    assert!(matches!(
        h.dce.process(codec, &in_desc, &out_desc, &tiny, &out_args),
        Err(DceError::InvalidInput(_))
    ));

    h.dce.close_engine(engine).unwrap();
}

#[test]
fn operations_need_an_open_engine() {
    let h = Harness::new();
    let params = h.params(64);
    let engine = dcelink::EngineHandle::from_raw(1).unwrap();

    let err = h
        .dce
        .create_codec(engine, "ivahd_h264dec", &params, CodecFamily::Viddec3)
        .unwrap_err();
    assert!(matches!(err, DceError::NotConnected));
    assert_eq!(h.arena.stats().live_blocks, 1);
}

/// Client whose channel accepts engine open and fails everything else.
fn failing_client(arena: &Arc<MmapArena>) -> Dce {
    let remote = arena.clone();
    let connector = Arc::new(MockConnector::new(move || {
        let remote = remote.clone();
        let mut channel = MockChannel::new();
        channel.expect_call().returning(move |ctx| {
            if ctx.fxn_id() == FxnId::EngineOpen.id() {
                remote
                    .write_u64(
                        message_addr(ctx) + EngineOpenMsg::ENG_HANDLE_OFFSET as u64,
                        0x1000,
                    )
                    .unwrap();
                Ok(0)
            } else {
                Err(MmRpcError::Call {
                    fxn_id: ctx.fxn_id(),
                    reason: "mailbox timeout".into(),
                })
            }
        });
        channel
    }));
    Dce::new(DceConfig::default(), connector, arena.clone())
}

#[test]
fn failed_calls_free_their_message_exactly_once() {
    let arena = Arc::new(MmapArena::new());
    let dce = failing_client(&arena);
    let engine = dce.open_engine(ENGINE_NAME).unwrap().handle;

    let params = dce.alloc_params(64).unwrap();
    let mut status = dce.alloc_params(128).unwrap();
    let version = dce.alloc_params(64).unwrap();
    status.write_u64(8, version.addr()).unwrap();
    let codec = dcelink::CodecHandle::from_raw(0xc0de, CodecFamily::Viddec3).unwrap();

    let before = arena.stats();
    let results = [
        dce.create_codec(engine, "ivahd_h264dec", &params, CodecFamily::Viddec3)
            .map(drop),
        dce.control_codec(codec, XdmCmd::GetStatus, &params, &status)
            .map(drop),
        dce.get_version(codec, &params, &status).map(drop),
        dce.delete_codec(codec),
    ];
    for result in results {
        assert_eq!(result.unwrap_err().status(), DceStatus::IpcCallFail);
    }

    let after = arena.stats();
    assert_eq!(after.allocs - before.allocs, 4);
    assert_eq!(after.frees - before.frees, 4);
    assert_eq!(after.live_blocks, before.live_blocks);

    assert!(dce.close_engine(engine).is_err());
    assert_eq!(arena.stats().live_blocks, 3);
}

#[test]
fn exhausted_memory_fails_before_the_call() {
    // Parameter blocks leave one byte too little for a get-version message
    let arena = Arc::new(MmapArena::with_capacity(64 + 128 + CodecGetVersionMsg::SIZE - 1));
    let dce = failing_client(&arena);
    let engine = dce.open_engine(ENGINE_NAME).unwrap().handle;

    let params = dce.alloc_params(64).unwrap();
    let mut status = dce.alloc_params(128).unwrap();
    status.write_u64(8, params.addr()).unwrap();
    let codec = dcelink::CodecHandle::from_raw(0xc0de, CodecFamily::Viddec3).unwrap();

    let err = dce.get_version(codec, &params, &status).unwrap_err();
    assert_eq!(err.status(), DceStatus::OutOfMemory);
    assert_eq!(arena.stats().failed_allocs, 1);
    assert_eq!(arena.stats().frees, 1);

    assert!(dce.close_engine(engine).is_err());
    dce.free_params(params).unwrap();
    dce.free_params(status).unwrap();
    assert_eq!(arena.stats().live_blocks, 0);
}
