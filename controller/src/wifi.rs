//! Station join with retries, falling back to a setup access point.

use std::{net::Ipv4Addr, thread, time::Duration};

use anyhow::{anyhow, Context};
use embedded_svc::wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::modem::Modem,
    ipv4::{
        ClientConfiguration as IpClientConfiguration, ClientSettings as IpClientSettings,
        Configuration as IpConfiguration, Mask, Subnet,
    },
    netif::{EspNetif, NetifConfiguration},
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use fan_common::{
    network::StaticIpv4, plan_station, NetworkConfig, RetryPolicy, SetupReason, StationPlan,
};

use crate::esp::monotonic_ms;

const SETUP_AP_SSID: &str = "FanController-AP";
const SETUP_AP_PASSWORD: &str = "FanSetup";
const SETUP_AP_CHANNEL: u8 = 1;
const OFFLINE_RESTART_AFTER_MS: u64 = 300_000;
const LINK_CHECK_INTERVAL: Duration = Duration::from_secs(1);

type Wifi<'a> = BlockingWifi<&'a mut EspWifi<'static>>;

pub enum Link {
    Station(EspWifi<'static>),
    Setup(EspWifi<'static>),
}

pub fn bring_up(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
    policy: RetryPolicy,
) -> anyhow::Result<Link> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;

    let plan = plan_station(network);
    if let StationPlan::Join {
        static_ip: Some(settings),
        ..
    } = &plan
    {
        esp_wifi
            .swap_netif_sta(static_netif(settings)?)
            .context("failed to apply static IP netif")?;
    }

    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;
    let reason = match plan {
        StationPlan::Setup(reason) => reason,
        StationPlan::Join { ssid, password, .. } => {
            match join_station(&mut wifi, &ssid, &password, policy) {
                Ok(()) => return Ok(Link::Station(esp_wifi)),
                Err(err) => {
                    warn!("giving up on `{ssid}`: {err:#}");
                    let _ = wifi.stop();
                    SetupReason::JoinFailed {
                        attempts: policy.attempts.max(1),
                    }
                }
            }
        }
    };

    warn!("opening setup AP `{SETUP_AP_SSID}`: {}", reason.describe());
    open_setup_ap(&mut wifi)?;
    Ok(Link::Setup(esp_wifi))
}

fn join_station(
    wifi: &mut Wifi<'_>,
    ssid: &str,
    password: &str,
    policy: RetryPolicy,
) -> anyhow::Result<()> {
    let auth_method = if password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };
    let client = ClientConfiguration {
        ssid: ssid
            .try_into()
            .map_err(|_| anyhow!("ssid `{ssid}` is longer than 32 bytes"))?,
        password: password
            .try_into()
            .map_err(|_| anyhow!("wifi password is longer than 64 bytes"))?,
        auth_method,
        ..Default::default()
    };
    wifi.set_configuration(&Configuration::Client(client))?;
    wifi.start()?;

    let attempts = policy.attempts.max(1);
    policy.run(
        |attempt| {
            info!("joining `{ssid}` ({attempt}/{attempts})");
            let joined = wifi.connect().and_then(|()| wifi.wait_netif_up());
            if joined.is_err() {
                let _ = wifi.disconnect();
            }
            joined
        },
        |attempt, err| {
            warn!("join attempt {attempt} failed: {err}");
            thread::sleep(Duration::from_millis(policy.delay_ms));
        },
    )?;

    info!("station link up on `{ssid}`");
    Ok(())
}

fn static_netif(settings: &StaticIpv4) -> anyhow::Result<EspNetif> {
    let fixed = IpClientSettings {
        ip: Ipv4Addr::from(settings.ip),
        subnet: Subnet {
            gateway: Ipv4Addr::from(settings.gateway),
            mask: Mask(settings.prefix_len),
        },
        dns: settings.dns.map(Ipv4Addr::from),
        secondary_dns: None,
    };
    let conf = NetifConfiguration {
        ip_configuration: Some(IpConfiguration::Client(IpClientConfiguration::Fixed(fixed))),
        ..NetifConfiguration::wifi_default_client()
    };
    EspNetif::new_with_conf(&conf).context("failed to create static IP netif")
}

fn open_setup_ap(wifi: &mut Wifi<'_>) -> anyhow::Result<()> {
    let ap = AccessPointConfiguration {
        ssid: SETUP_AP_SSID
            .try_into()
            .map_err(|_| anyhow!("setup AP ssid too long"))?,
        password: SETUP_AP_PASSWORD
            .try_into()
            .map_err(|_| anyhow!("setup AP password too long"))?,
        auth_method: AuthMethod::WPA2Personal,
        channel: SETUP_AP_CHANNEL,
        ..Default::default()
    };
    wifi.set_configuration(&Configuration::AccessPoint(ap))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    info!("setup AP `{SETUP_AP_SSID}` is up (password `{SETUP_AP_PASSWORD}`)");
    Ok(())
}

/// Restarts the device once the station link has been down for too long.
pub fn spawn_link_supervisor() -> anyhow::Result<()> {
    thread::Builder::new()
        .name("link-supervisor".into())
        .stack_size(4 * 1024)
        .spawn(|| {
            let mut offline_since: Option<u64> = None;
            loop {
                let now_ms = monotonic_ms();
                match (station_connected(), offline_since) {
                    (true, _) => offline_since = None,
                    (false, None) => {
                        warn!("station link lost");
                        offline_since = Some(now_ms);
                    }
                    (false, Some(since))
                        if now_ms.saturating_sub(since) >= OFFLINE_RESTART_AFTER_MS =>
                    {
                        warn!(
                            "station offline for {}s, restarting",
                            OFFLINE_RESTART_AFTER_MS / 1000
                        );
                        thread::sleep(Duration::from_millis(100));
                        unsafe { esp_idf_svc::sys::esp_restart() };
                    }
                    (false, Some(_)) => {}
                }
                thread::sleep(LINK_CHECK_INTERVAL);
            }
        })
        .context("failed to spawn link supervisor")?;
    Ok(())
}

fn station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
}
