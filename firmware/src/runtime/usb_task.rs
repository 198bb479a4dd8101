use embassy_futures::join::join;
use embassy_futures::select::{Either3, select3};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_usb::class::cdc_acm::{ControlChanged, Sender};
use embassy_usb::driver::{Driver, EndpointError};

use super::{REQUESTS, RESPONSES, ResponsePacket, USB_STORAGE};
use crate::link::RequestAssembler;
use crate::usb::{self, ConsolePort, UsbConsole, UsbDeviceStrings};

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

#[embassy_executor::task]
pub async fn run(
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
) -> ! {
    let storage = USB_STORAGE.init(usb::UsbDeviceStorage::new());
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);

    let UsbConsole { mut device, port } =
        UsbConsole::new(driver, storage, UsbDeviceStrings::default());

    join(device.run(), run_console(port)).await;
    loop {
        core::future::pending::<()>().await;
    }
}

async fn run_console<D>(port: ConsolePort<D>) -> !
where
    D: Driver<'static>,
{
    let ConsolePort {
        mut sender,
        mut receiver,
        control,
    } = port;
    let requests = REQUESTS.sender();
    let responses = RESPONSES.receiver();
    let mut ingress = [0u8; usb::MAX_PACKET_SIZE as usize];
    let mut assembler = RequestAssembler::new();
    let mut pending_tx: Option<ResponsePacket> = None;

    loop {
        join(receiver.wait_connection(), sender.wait_connection()).await;
        wait_for_dtr(&control, &mut sender).await;
        assembler.reset();

        defmt::info!("usb: console connected");

        loop {
            match select3(
                receiver.read_packet(&mut ingress),
                async {
                    // The packet stays queued until the write completes.
                    if pending_tx.is_none() {
                        pending_tx = Some(responses.receive().await);
                    }
                    let Some(packet) = pending_tx.as_ref() else {
                        return Ok(());
                    };
                    match sender.write_packet(packet).await {
                        Ok(()) => {
                            pending_tx.take();
                            Ok(())
                        }
                        Err(err) => Err(err),
                    }
                },
                control.control_changed(),
            )
            .await
            {
                Either3::First(Ok(count)) => {
                    for &byte in &ingress[..count] {
                        match assembler.feed(byte) {
                            Some(Ok(frame)) => requests.send(frame).await,
                            Some(Err(err)) => {
                                defmt::warn!(
                                    "usb: dropping request: {}",
                                    defmt::Display2Format(&err)
                                );
                            }
                            None => {}
                        }
                    }
                }
                Either3::First(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: console interface disabled");
                    break;
                }
                Either3::First(Err(_)) => {
                    defmt::warn!("usb: console read error");
                }
                Either3::Second(Ok(())) => {}
                Either3::Second(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: console write disabled");
                    break;
                }
                Either3::Second(Err(_)) => {
                    defmt::warn!("usb: console write error");
                }
                Either3::Third(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: host dropped DTR");
                        pending_tx.take();
                        break;
                    }
                }
            }
        }
    }
}

async fn wait_for_dtr<D>(control: &ControlChanged<'static>, sender: &mut Sender<'static, D>)
where
    D: Driver<'static>,
{
    while !sender.dtr() {
        control.control_changed().await;
    }
}
