#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]
//! Beacon node firmware for the Adafruit Feather STM32F405 with a W5500 wing
//!
//! Keeps the internal RTC on network time and the timezone in flash. One
//! cooperative loop drives the time service every 50 ms; the heartbeat LED
//! blinks once while the clock is fresh and three times while it is stale.

use core::sync::atomic::{AtomicBool, Ordering};

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod config;
mod eth;
mod network;
mod rtc;

stm32_tim2_monotonic!(Mono, 1_000_000);

/// Set by the time loop, read by the heartbeat
static CLOCK_STALE: AtomicBool = AtomicBool::new(true);

/// Milliseconds since boot from the TIM2 monotonic
fn uptime_ms() -> u64 {
    Mono::now().ticks() / 1_000
}

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1, USART2, USART3])]
mod app {
    use super::*;
    use defmt::{error, info};
    use embassy_futures::join::join3;
    use embassy_stm32::exti::ExtiInput;
    use embassy_stm32::gpio::{Level, Output, Pull, Speed};
    use embassy_stm32::peripherals;
    use embassy_stm32::rcc::{Hse, HseMode, LsConfig, LseConfig, LseMode};
    use embassy_stm32::rtc::{Rtc, RtcConfig};
    use embassy_stm32::spi::{self, Spi};
    use embassy_stm32::time::Hertz;

    type SpiPeripheral = embassy_stm32::Peri<'static, peripherals::SPI2>;
    type PinPB13 = embassy_stm32::Peri<'static, peripherals::PB13>;
    type PinPB15 = embassy_stm32::Peri<'static, peripherals::PB15>;
    type PinPB14 = embassy_stm32::Peri<'static, peripherals::PB14>;
    type PinPC6 = embassy_stm32::Peri<'static, peripherals::PC6>;
    type PinPC3 = embassy_stm32::Peri<'static, peripherals::PC3>;
    type PinPC2 = embassy_stm32::Peri<'static, peripherals::PC2>;
    type ExtiChannel = embassy_stm32::Peri<'static, peripherals::EXTI2>;
    type DmaTx = embassy_stm32::Peri<'static, peripherals::DMA1_CH4>;
    type DmaRx = embassy_stm32::Peri<'static, peripherals::DMA1_CH3>;
    type FlashPeripheral = embassy_stm32::Peri<'static, peripherals::FLASH>;

    struct NetworkPeripherals {
        spi: SpiPeripheral,
        sck: PinPB13,
        mosi: PinPB15,
        miso: PinPB14,
        cs: PinPC6,
        reset: PinPC3,
        int: PinPC2,
        exti: ExtiChannel,
        dma_tx: DmaTx,
        dma_rx: DmaRx,
    }

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Output<'static>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("Beacon node starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE, 32.768 kHz LSE (PC14/PC15)
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        config.rcc.ls = LsConfig {
            rtc: embassy_stm32::rcc::RtcClockSource::LSE,
            lsi: false,
            lse: Some(LseConfig {
                frequency: Hertz(32_768),
                mode: LseMode::Oscillator(embassy_stm32::rcc::LseDrive::MediumHigh),
            }),
        };

        let p = embassy_stm32::init(config);
        info!("System initialized: SYSCLK=84MHz, RTC on LSE");

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        let timer_clock_hz = 84_000_000;
        Mono::start(timer_clock_hz);

        let rtc = Rtc::new(p.RTC, RtcConfig::default());
        rtc::initialize_rtc(rtc);

        let led = Output::new(p.PC1, Level::High, Speed::Low);

        let net_periph = NetworkPeripherals {
            spi: p.SPI2,
            sck: p.PB13,
            mosi: p.PB15,
            miso: p.PB14,
            cs: p.PC6,
            reset: p.PC3,
            int: p.PC2,
            exti: p.EXTI2,
            dma_tx: p.DMA1_CH4,
            dma_rx: p.DMA1_CH3,
        };

        heartbeat::spawn().ok();
        network_task::spawn(net_periph, p.FLASH).ok();

        (Shared {}, Local { led })
    }

    /// Heartbeat LED: one blink while synchronized, three while stale
    #[task(priority = 1, local = [led])]
    async fn heartbeat(cx: heartbeat::Context) {
        loop {
            let blinks = if CLOCK_STALE.load(Ordering::Relaxed) { 3 } else { 1 };
            for _ in 0..blinks {
                cx.local.led.set_high();
                Mono::delay(100.millis()).await;
                cx.local.led.set_low();
                Mono::delay(200.millis()).await;
            }
            Mono::delay(4000.millis()).await;
        }
    }

    /// Network task - runs the Ethernet stack and the time service
    ///
    /// Stack is !Send and must remain within this task.
    #[task(priority = 1)]
    async fn network_task(
        _cx: network_task::Context,
        periph: NetworkPeripherals,
        flash: FlashPeripheral,
    ) -> ! {
        use embassy_net::{Config, StackResources};
        use static_cell::StaticCell;

        let net_config = config::NetworkConfig::default();

        let mut spi_config = spi::Config::default();
        spi_config.frequency = Hertz(net_config.spi_hz);

        let spi = Spi::new(
            periph.spi,
            periph.sck,
            periph.mosi,
            periph.miso,
            periph.dma_tx,
            periph.dma_rx,
            spi_config,
        );

        let cs = Output::new(periph.cs, Level::High, Speed::VeryHigh);
        let reset = Output::new(periph.reset, Level::High, Speed::Low);
        let int = ExtiInput::new(periph.int, periph.exti, Pull::Up);

        let eth_periph = eth::EthPeripherals {
            spi,
            cs,
            reset,
            int,
        };

        let (device, w5500_runner) = match eth::init_w5500(eth_periph, net_config.mac_addr).await {
            Ok(parts) => parts,
            Err(e) => {
                error!("Ethernet unavailable: {}", e);
                loop {
                    Mono::delay(60.secs()).await;
                }
            }
        };

        static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
        let (stack, mut net_runner) = embassy_net::new(
            device,
            Config::dhcpv4(Default::default()),
            RESOURCES.init(StackResources::new()),
            net_config.seed,
        );
        info!("Network stack initialized with DHCP");

        let (_, _, never) = join3(
            w5500_runner.run(),
            net_runner.run(),
            run_time_service(stack, flash),
        )
        .await;
        never
    }

    /// Drive the time service forever
    async fn run_time_service(stack: embassy_net::Stack<'static>, flash: FlashPeripheral) -> ! {
        use embassy_net::udp::{PacketMetadata, UdpSocket};
        use embassy_stm32::flash::Flash;
        use node_core::{NorBlobStore, SyncEvent, TimeService};

        network::wait_for_config(&stack).await;

        let service_config = config::time_service_config();
        let server = service_config.sync.server;

        let mut rx_meta = [PacketMetadata::EMPTY; 2];
        let mut rx_buffer = [0u8; 128];
        let mut tx_meta = [PacketMetadata::EMPTY; 2];
        let mut tx_buffer = [0u8; 128];
        let socket = UdpSocket::new(
            stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        let mut transport = network::UdpTransport::new(socket);
        transport.resolve(stack, server).await;

        let storage = NorBlobStore::new(Flash::new_blocking(flash), config::ZONE_STORE_OFFSET);
        let mut service = TimeService::with_posix_rules(
            service_config,
            transport,
            storage,
            rtc::RtcClock,
        );
        service.initialize(uptime_ms());
        info!("Timezone: {}", service.zone_description().as_str());

        loop {
            let now_ms = uptime_ms();
            match service.process(now_ms) {
                Some(SyncEvent::Synced { .. }) => info!(
                    "Time synchronized: {} UTC, {} local",
                    service.utc_time_hhmmss().as_str(),
                    service.local_time_hhmm().as_str()
                ),
                Some(SyncEvent::TimedOut) if !service.transport().is_resolved(server) => {
                    service.transport_mut().resolve(stack, server).await;
                }
                _ => {}
            }
            service.save_if_needed();
            CLOCK_STALE.store(service.is_stale(now_ms), Ordering::Relaxed);

            Mono::delay(config::SERVICE_TICK_MS.millis()).await;
        }
    }

    /// RTIC idle task - WFI sleep mode when no tasks active
    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        info!("Idle task started - entering WFI loop");
        loop {
            cortex_m::asm::wfi();
        }
    }
}
