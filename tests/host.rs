mod common;

use common::{Event, Recorder, Sim, TestBuffer, TestDelay};
use otg_usb::config::HostConfig;
use otg_usb::host::{DataPid, Packet, PipeEvent, PipeHandle, PortEvent, Token, UsbHost};
use otg_usb::hw::regs::{gintsts, hcchar, hcint, hctsiz, hprt, pid, pktsts, reg, ChannelSize};
use otg_usb::usb::{EndpointAddress, EndpointType, PowerState, Speed};
use otg_usb::Error;

type Host = UsbHost<Sim, TestDelay, Recorder>;

/// HPRT speed codes.
const HIGH: u32 = 0;
const FULL: u32 = 1;

fn powered(config: HostConfig) -> (Host, Sim, Recorder) {
    let sim = Sim::new();
    let rec = Recorder::default();
    let mut host = UsbHost::new(sim.clone(), TestDelay::default(), config).unwrap();
    host.initialize(rec.clone()).unwrap();
    host.power_control(PowerState::Full).unwrap();
    (host, sim, rec)
}

/// Powered host with an enabled device on the root port.
fn attached(pspd: u32, config: HostConfig) -> (Host, Sim, Recorder) {
    let (mut host, sim, rec) = powered(config);
    sim.attach(pspd);
    host.on_interrupt();
    host.port_reset(0).unwrap();
    assert_eq!(
        rec.take(),
        vec![Event::Port(0, PortEvent::Connect), Event::Port(0, PortEvent::Reset)]
    );
    sim.clear_log();
    (host, sim, rec)
}

fn pipe(host: &mut Host, ep: u8, ty: EndpointType, mps: u16, interval: u8) -> PipeHandle {
    let speed = host.port_state(0).speed;
    host.pipe_create(1, speed, 0, 0, EndpointAddress::from_raw(ep), ty, mps, interval)
        .unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7) as u8).collect()
}

#[test]
fn test_power_up_layout() {
    let (host, sim, _) = powered(HostConfig::DEFAULT);
    assert_eq!(sim.get(reg::GRXFSIZ), 2048 / 4);
    assert_eq!(sim.get(reg::DIEPTXF0_HNPTXFSIZ), (256 << 16) | 512);
    assert_eq!(sim.get(reg::HPTXFSIZ), (256 << 16) | 768);
    assert_eq!(sim.get(reg::HAINTMSK), 0xFFFF);
    assert!(sim.core().irq_enabled);
    assert!(!host.port_state(0).connected);
}

#[test]
fn test_port_calls_need_power_and_port_zero() {
    let mut host: Host =
        UsbHost::new(Sim::new(), TestDelay::default(), HostConfig::DEFAULT).unwrap();
    assert_eq!(host.port_reset(0), Err(Error::Failed));
    assert_eq!(host.power_control(PowerState::Full), Err(Error::Failed));

    let (mut host, sim, _) = powered(HostConfig::DEFAULT);
    assert_eq!(host.port_vbus_on_off(1, true), Err(Error::Parameter));
    host.port_vbus_on_off(0, true).unwrap();
    assert!(sim.core().vbus);
    assert_eq!(host.power_control(PowerState::Low), Err(Error::Unsupported));
}

#[test]
fn test_port_reset_enables_port() {
    let (host, sim, _) = attached(HIGH, HostConfig::DEFAULT);
    assert!(!host.port_reset_pending());
    let state = host.port_state(0);
    assert!(state.connected);
    assert_eq!(state.speed, Speed::High);
    assert_eq!(sim.get(reg::HFIR), 7500);
}

#[test]
fn test_port_reset_fails_without_enable() {
    let (mut host, sim, rec) = powered(HostConfig::DEFAULT);
    sim.attach(FULL);
    host.on_interrupt();
    rec.take();
    sim.core().port_dead = true;

    assert_eq!(host.port_reset(0), Err(Error::Failed));
    assert!(!host.port_reset_pending());
    assert!(rec.events().is_empty());
}

#[test]
fn test_full_speed_frame_interval() {
    let (host, sim, _) = attached(FULL, HostConfig::DEFAULT);
    assert_eq!(host.port_state(0).speed, Speed::Full);
    assert_eq!(sim.get(reg::HFIR), 48000);
    assert_eq!(sim.get(reg::HCFG) & 0x3, 1);
}

#[test]
fn test_pipe_create_programs_channel() {
    let (mut host, sim, _) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Bulk, 64, 0);
    assert_eq!(h.channel(), 0);

    let chr = sim.get(reg::hcchar(0));
    assert_eq!(chr & hcchar::MPSIZ_MSK, 64);
    assert_eq!((chr & hcchar::EPNUM_MSK) >> hcchar::EPNUM_POS, 1);
    assert_ne!(chr & hcchar::EPDIR, 0);
    assert_eq!((chr & hcchar::EPTYP_MSK) >> hcchar::EPTYP_POS, 2);
    assert_eq!((chr & hcchar::DAD_MSK) >> hcchar::DAD_POS, 1);

    let out = pipe(&mut host, 0x02, EndpointType::Bulk, 64, 0);
    assert_eq!(out.channel(), 1);
    assert_eq!(sim.get(reg::hcchar(1)) & hcchar::EPDIR, 0);
}

#[test]
fn test_no_free_channel() {
    let config = HostConfig {
        max_pipes: 2,
        ..HostConfig::DEFAULT
    };
    let (mut host, _, _) = attached(FULL, config);
    pipe(&mut host, 0x81, EndpointType::Bulk, 64, 0);
    pipe(&mut host, 0x02, EndpointType::Bulk, 64, 0);
    let third = host.pipe_create(
        1,
        Speed::Full,
        0,
        0,
        EndpointAddress::from_raw(0x83),
        EndpointType::Interrupt,
        8,
        10,
    );
    assert_eq!(third, None);
}

#[test]
fn test_delete_frees_channel() {
    let (mut host, sim, _) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Bulk, 64, 0);
    host.pipe_delete(h).unwrap();
    assert_eq!(sim.get(reg::hcchar(0)), 0);
    let again = pipe(&mut host, 0x82, EndpointType::Bulk, 64, 0);
    assert_eq!(again.channel(), 0);
}

#[test]
fn test_transfer_requires_connected_port() {
    let (mut host, sim, _) = powered(HostConfig::DEFAULT);
    let h = host
        .pipe_create(
            0,
            Speed::Full,
            0,
            0,
            EndpointAddress::from_raw(0x00),
            EndpointType::Control,
            8,
            0,
        )
        .unwrap();
    let setup = Packet::new(Token::Setup);
    assert_eq!(
        host.pipe_transfer(h, setup, TestBuffer::new(8).buffer()),
        Err(Error::Failed)
    );
    assert_eq!(sim.starts(0), 0);
    assert!(!host.pipe(h).unwrap().is_active());
}

#[test]
fn test_setup_transfer() {
    let (mut host, sim, rec) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x00, EndpointType::Control, 8, 0);
    let request = [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00];
    host.pipe_transfer(
        h,
        Packet::new(Token::Setup),
        TestBuffer::from_slice(&request).buffer(),
    )
    .unwrap();

    let size = ChannelSize::new(sim.get(reg::hctsiz(0)));
    assert_eq!(size.dpid(), pid::MDATA);
    assert_eq!(size.transfer_size(), 8);
    assert_eq!(size.packet_count(), 1);
    assert_eq!(sim.tx_bytes(0), request.to_vec());
    assert_eq!(
        host.pipe_transfer(h, Packet::new(Token::Setup), TestBuffer::new(8).buffer()),
        Err(Error::Busy)
    );

    sim.raise(reg::hcint(0), hcint::XFRC);
    host.on_interrupt();
    assert_eq!(host.pipe_transfer_result(h), 8);
    assert_eq!(rec.events(), vec![Event::Pipe(h, PipeEvent::TransferComplete)]);
}

#[test]
fn test_in_transfer_reenabled_after_ack() {
    let (mut host, sim, rec) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Bulk, 64, 0);
    let buf = TestBuffer::new(100);
    host.pipe_transfer(h, Packet::new(Token::In).with_data(DataPid::Data1), buf.buffer())
        .unwrap();
    assert_eq!(sim.starts(0), 1);
    let size = ChannelSize::new(sim.get(reg::hctsiz(0)));
    assert_eq!(size.dpid(), pid::DATA1);
    assert_eq!(size.packet_count(), 2);

    let data = pattern(100);
    sim.push_rx(0, pktsts::DATA, pid::DATA1, &data[..64]);
    sim.raise(reg::hcint(0), hcint::ACK);
    host.on_interrupt();
    assert_eq!(sim.starts(0), 2);

    sim.push_rx(0, pktsts::DATA, pid::DATA0, &data[64..]);
    sim.raise(reg::hcint(0), hcint::XFRC);
    host.on_interrupt();
    // Halted after completion; the event follows the halt.
    assert!(rec.events().is_empty());
    host.on_interrupt();

    assert_eq!(host.pipe_transfer_result(h), 100);
    assert_eq!(buf.contents(), data);
    assert_eq!(rec.events(), vec![Event::Pipe(h, PipeEvent::TransferComplete)]);
}

#[test]
fn test_out_nyet_pings_before_rest() {
    let (mut host, sim, rec) = attached(HIGH, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x02, EndpointType::Bulk, 512, 0);
    let data = pattern(1024);
    host.pipe_transfer(
        h,
        Packet::new(Token::Out).with_data(DataPid::Data0),
        TestBuffer::from_slice(&data).buffer(),
    )
    .unwrap();
    let size = ChannelSize::new(sim.get(reg::hctsiz(0)));
    assert_eq!(size.transfer_size(), 1024);
    assert_eq!(size.packet_count(), 2);

    // First packet accepted with NYET, one still counted.
    sim.set(reg::hctsiz(0), (1 << hctsiz::PKTCNT_POS) | 512);
    sim.raise(reg::hcint(0), hcint::NYET);
    host.on_interrupt();
    assert_eq!(host.pipe_transfer_result(h), 512);

    // Halt completes; the restart is a PING.
    sim.clear_log();
    host.on_interrupt();
    let size = ChannelSize::new(sim.get(reg::hctsiz(0)));
    assert!(size.do_ping());
    assert_eq!(size.transfer_size(), 0);
    assert_eq!(sim.starts(0), 1);
    assert!(sim.tx_bytes(0).is_empty());

    sim.raise(reg::hcint(0), hcint::ACK);
    host.on_interrupt();
    sim.clear_log();
    host.on_interrupt();
    let size = ChannelSize::new(sim.get(reg::hctsiz(0)));
    assert!(!size.do_ping());
    assert_eq!(size.transfer_size(), 512);
    assert_eq!(sim.tx_bytes(0), data[512..].to_vec());

    sim.raise(reg::hcint(0), hcint::XFRC);
    host.on_interrupt();
    assert_eq!(host.pipe_transfer_result(h), 1024);
    assert_eq!(rec.events(), vec![Event::Pipe(h, PipeEvent::TransferComplete)]);
}

#[test]
fn test_out_deferred_until_fifo_room() {
    let (mut host, sim, rec) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x02, EndpointType::Bulk, 64, 0);
    sim.set(reg::HNPTXSTS, 8 << 16);

    host.pipe_transfer(h, Packet::new(Token::Out), TestBuffer::new(64).buffer())
        .unwrap();
    assert_eq!(sim.starts(0), 0);
    assert!(host.pipe(h).unwrap().is_active());

    sim.set(reg::HNPTXSTS, common::TXSTS_DEFAULT);
    sim.raise(reg::GINTSTS, gintsts::SOF);
    host.on_interrupt();
    assert_eq!(sim.starts(0), 1);

    sim.raise(reg::hcint(0), hcint::XFRC);
    host.on_interrupt();
    assert_eq!(rec.events(), vec![Event::Pipe(h, PipeEvent::TransferComplete)]);
}

#[test]
fn test_stall_reported_after_halt() {
    let (mut host, sim, rec) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Bulk, 64, 0);
    host.pipe_transfer(h, Packet::new(Token::In), TestBuffer::new(64).buffer())
        .unwrap();

    sim.raise(reg::hcint(0), hcint::STALL);
    host.on_interrupt();
    assert!(rec.events().is_empty());
    assert!(!host.pipe(h).unwrap().is_active());

    host.on_interrupt();
    assert_eq!(rec.events(), vec![Event::Pipe(h, PipeEvent::HandshakeStall)]);
}

#[test]
fn test_bus_error_reported_after_halt() {
    let (mut host, sim, rec) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Bulk, 64, 0);
    host.pipe_transfer(h, Packet::new(Token::In), TestBuffer::new(64).buffer())
        .unwrap();

    sim.raise(reg::hcint(0), hcint::TXERR);
    host.on_interrupt();
    host.on_interrupt();
    assert_eq!(rec.events(), vec![Event::Pipe(h, PipeEvent::BusError)]);
}

#[test]
fn test_disconnect_fails_active_pipes() {
    let (mut host, sim, rec) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Bulk, 64, 0);
    host.pipe_transfer(h, Packet::new(Token::In), TestBuffer::new(64).buffer())
        .unwrap();

    sim.detach();
    host.on_interrupt();
    assert_eq!(
        rec.events(),
        vec![
            Event::Pipe(h, PipeEvent::BusError),
            Event::Port(0, PortEvent::Disconnect)
        ]
    );
    assert!(!host.pipe(h).unwrap().is_active());
    assert!(!host.port_state(0).connected);
}

#[test]
fn test_interrupt_pipe_waits_interval() {
    let (mut host, sim, rec) = attached(HIGH, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Interrupt, 64, 8);
    assert_eq!(host.pipe(h).unwrap().interval_reload(), 128);

    // First poll goes out at once.
    host.pipe_transfer(h, Packet::new(Token::In), TestBuffer::new(64).buffer())
        .unwrap();
    assert_eq!(sim.starts(0), 1);
    sim.push_rx(0, pktsts::DATA, pid::DATA0, &pattern(64));
    sim.raise(reg::hcint(0), hcint::XFRC);
    host.on_interrupt();
    host.on_interrupt();
    assert_eq!(rec.take(), vec![Event::Pipe(h, PipeEvent::TransferComplete)]);

    // The next one waits a full interval.
    host.pipe_transfer(h, Packet::new(Token::In), TestBuffer::new(64).buffer())
        .unwrap();
    for _ in 0..127 {
        sim.raise(reg::GINTSTS, gintsts::SOF);
        host.on_interrupt();
    }
    assert_eq!(sim.starts(0), 1);

    sim.raise(reg::GINTSTS, gintsts::SOF);
    host.on_interrupt();
    assert_eq!(sim.starts(0), 2);
}

#[test]
fn test_interrupt_in_nak_halts_until_next_interval() {
    let (mut host, sim, _) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Interrupt, 8, 4);
    host.pipe_transfer(h, Packet::new(Token::In), TestBuffer::new(8).buffer())
        .unwrap();

    sim.raise(reg::hcint(0), hcint::NAK);
    host.on_interrupt();
    host.on_interrupt();
    assert_eq!(sim.starts(0), 1);

    for _ in 0..4 {
        sim.raise(reg::GINTSTS, gintsts::SOF);
        host.on_interrupt();
    }
    assert_eq!(sim.starts(0), 2);
    assert!(host.pipe(h).unwrap().is_active());
}

#[test]
fn test_bulk_in_nak_delay() {
    let config = HostConfig::DEFAULT.with_bulk_in_nak_delay(3);
    let (mut host, sim, _) = attached(FULL, config);
    let h = pipe(&mut host, 0x81, EndpointType::Bulk, 64, 0);
    host.pipe_transfer(h, Packet::new(Token::In), TestBuffer::new(64).buffer())
        .unwrap();

    sim.raise(reg::hcint(0), hcint::NAK);
    host.on_interrupt();
    assert_eq!(sim.starts(0), 1);
    for _ in 0..2 {
        sim.raise(reg::GINTSTS, gintsts::SOF);
        host.on_interrupt();
    }
    assert_eq!(sim.starts(0), 1);

    sim.raise(reg::GINTSTS, gintsts::SOF);
    host.on_interrupt();
    assert_eq!(sim.starts(0), 2);
}

#[test]
fn test_bulk_in_nak_retried_at_once() {
    let (mut host, sim, _) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Bulk, 64, 0);
    host.pipe_transfer(h, Packet::new(Token::In), TestBuffer::new(64).buffer())
        .unwrap();

    sim.raise(reg::hcint(0), hcint::NAK);
    host.on_interrupt();
    assert_eq!(sim.starts(0), 2);
}

#[test]
fn test_abort_times_out_when_channel_will_not_halt() {
    let (mut host, sim, _) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Bulk, 64, 0);
    host.pipe_transfer(h, Packet::new(Token::In), TestBuffer::new(64).buffer())
        .unwrap();

    sim.core().halt_stuck = true;
    assert_eq!(host.pipe_transfer_abort(h), Err(Error::Timeout));
    assert!(!host.pipe(h).unwrap().is_active());
}

#[test]
fn test_abort_halts_channel() {
    let (mut host, sim, rec) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Bulk, 64, 0);
    host.pipe_transfer(h, Packet::new(Token::In), TestBuffer::new(64).buffer())
        .unwrap();

    host.pipe_transfer_abort(h).unwrap();
    assert_eq!(sim.get(reg::hcchar(0)) & hcchar::CHENA, 0);
    host.on_interrupt();
    assert!(rec.events().is_empty());
}

#[test]
fn test_busy_pipe_cannot_be_modified() {
    let (mut host, _, _) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Bulk, 64, 0);
    host.pipe_transfer(h, Packet::new(Token::In), TestBuffer::new(64).buffer())
        .unwrap();
    assert_eq!(host.pipe_modify(h, 2, Speed::Full, 0, 0, 64), Err(Error::Busy));
    assert_eq!(host.pipe_delete(h), Err(Error::Busy));
    assert_eq!(host.pipe_reset(h), Err(Error::Busy));
}

#[test]
fn test_high_speed_interrupt_in_two_packets() {
    let (mut host, sim, rec) = attached(HIGH, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x81, EndpointType::Interrupt, 64, 1);
    let buf = TestBuffer::new(128);
    host.pipe_transfer(h, Packet::new(Token::In), buf.buffer())
        .unwrap();
    let size = ChannelSize::new(sim.get(reg::hctsiz(0)));
    assert_eq!(size.transfer_size(), 128);
    assert_eq!(size.packet_count(), 2);

    let data = pattern(128);
    sim.push_rx(0, pktsts::DATA, pid::DATA0, &data[..64]);
    sim.raise(reg::hcint(0), hcint::ACK);
    host.on_interrupt();
    assert_eq!(sim.starts(0), 2);

    sim.push_rx(0, pktsts::DATA, pid::DATA1, &data[64..]);
    sim.raise(reg::hcint(0), hcint::ACK | hcint::XFRC);
    host.on_interrupt();
    host.on_interrupt();
    for _ in 0..4 {
        sim.raise(reg::GINTSTS, gintsts::SOF);
        host.on_interrupt();
    }

    assert_eq!(host.pipe_transfer_result(h), 128);
    assert_eq!(buf.contents(), data);
    assert_eq!(rec.events(), vec![Event::Pipe(h, PipeEvent::TransferComplete)]);
    assert_eq!(sim.starts(0), 2);
}

#[test]
fn test_failed_restart_reports_bus_error() {
    let (mut host, sim, rec) = attached(FULL, HostConfig::DEFAULT);
    let h = pipe(&mut host, 0x02, EndpointType::Bulk, 64, 0);
    sim.set(reg::HNPTXSTS, 8 << 16);
    host.pipe_transfer(h, Packet::new(Token::Out), TestBuffer::new(64).buffer())
        .unwrap();
    assert!(host.pipe(h).unwrap().is_active());

    // Device gone without a disconnect interrupt; the deferred start cannot go out.
    sim.clear(reg::HPRT, hprt::PCSTS);
    sim.set(reg::HNPTXSTS, common::TXSTS_DEFAULT);
    sim.raise(reg::GINTSTS, gintsts::SOF);
    host.on_interrupt();

    assert_eq!(sim.starts(0), 0);
    assert!(!host.pipe(h).unwrap().is_active());
    assert_eq!(rec.events(), vec![Event::Pipe(h, PipeEvent::BusError)]);

    // Nothing further is reported for the pipe.
    sim.raise(reg::GINTSTS, gintsts::SOF);
    host.on_interrupt();
    assert_eq!(rec.events().len(), 1);
}
