use crate::{fan::FanRoute, types::FanPower};

const PAGE_HEAD: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Fan Controller</title>
  <style>
    body{font-family:Arial,sans-serif;max-width:480px;margin:2rem auto;padding:0 1rem;color:#111}
    .card{border:1px solid #ddd;border-radius:8px;padding:1rem;margin-bottom:1rem}
    form{display:inline-block;margin:.3rem}button{padding:.6rem 1rem;min-width:8rem}
    .muted{color:#555;font-size:.9rem}
  </style>
</head>
<body>
  <h1>Fan Controller</h1>
"#;

const PAGE_TAIL: &str = r#"  <p class="muted">State is presumed from the commands sent; use the sync buttons if the fan was changed with its remote.</p>
</body>
</html>
"#;

/// Root page. Clients scrape `Current State: <b>ON|OFF</b>`, keep it verbatim.
pub fn render_index(power: FanPower) -> String {
    let mut html = String::with_capacity(2048);
    html.push_str(PAGE_HEAD);
    html.push_str(&format!(
        "  <div class=\"card\"><p>Current State: <b>{}</b></p></div>\n",
        power.as_str()
    ));

    html.push_str("  <div class=\"card\">\n");
    for route in [FanRoute::Toggle, FanRoute::AddPower, FanRoute::LowerPower] {
        push_form(&mut html, route);
    }
    html.push_str("  </div>\n  <div class=\"card\">\n");
    for route in [FanRoute::SyncOn, FanRoute::SyncOff] {
        push_form(&mut html, route);
    }
    html.push_str("  </div>\n");

    html.push_str(PAGE_TAIL);
    html
}

const SETUP_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Fan Controller Setup</title>
  <style>
    body{font-family:Arial,sans-serif;max-width:480px;margin:2rem auto;padding:0 1rem;color:#111}
    input{display:block;width:100%;padding:.5rem;margin:.2rem 0 .8rem;box-sizing:border-box}
    button{padding:.6rem 1rem}#note{color:#555}
  </style>
</head>
<body>
  <h1>Fan Controller Setup</h1>
  <form id="join">
    <label for="ssid">Network name</label><input id="ssid" required>
    <label for="pass">Password</label><input id="pass" type="password">
    <button type="submit">Join and restart</button>
  </form>
  <p id="note">The controller restarts and joins this network once saved.</p>
  <script>
    const form=document.getElementById('join'),note=document.getElementById('note');
    form.addEventListener('submit',async(ev)=>{
      ev.preventDefault();
      const body={wifiSsid:form.ssid.value.trim()};
      if(form.pass.value)body.wifiPass=form.pass.value;
      const res=await fetch('/api/network',{method:'PUT',headers:{'content-type':'application/json'},body:JSON.stringify(body)});
      const out=await res.json().catch(()=>({}));
      note.textContent=res.ok?'Saved, restarting.':(out.error||'Save failed ('+res.status+')');
    });
  </script>
</body>
</html>
"#;

/// Page served by the setup access point when no station link is available.
pub fn render_setup_page() -> &'static str {
    SETUP_PAGE
}

fn push_form(html: &mut String, route: FanRoute) {
    html.push_str(&format!(
        "    <form method=\"POST\" action=\"{}\"><button type=\"submit\">{}</button></form>\n",
        route.path(),
        route.label()
    ));
}
