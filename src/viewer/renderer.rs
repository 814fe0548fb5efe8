use glow::{Context, HasContext as _};
use nalgebra::Matrix4;

/// Triangles (lit) and a ground grid (unlit) sharing one program.
pub struct GpuMesh {
    program: glow::Program,
    mesh: Batch,
    grid: Batch,
    u_mvp: glow::UniformLocation,
    u_color: glow::UniformLocation,
    u_lit: glow::UniformLocation,
}

struct Batch {
    vao: glow::VertexArray,
    vbo: glow::Buffer,
    vertex_count: i32,
}

unsafe impl Send for GpuMesh {}
unsafe impl Sync for GpuMesh {}

#[cfg(target_arch = "wasm32")]
const SHADER_VERSION: &str = "#version 300 es";
#[cfg(not(target_arch = "wasm32"))]
const SHADER_VERSION: &str = "#version 330 core";

const VERTEX_SHADER: &str = r#"
    precision highp float;
    uniform mat4 u_mvp;
    layout(location = 0) in vec3 a_pos;
    layout(location = 1) in vec3 a_nrm;
    out vec3 v_nrm;
    void main() {
        v_nrm = a_nrm;
        gl_Position = u_mvp * vec4(a_pos, 1.0);
    }"#;

const FRAGMENT_SHADER: &str = r#"
    precision mediump float;
    uniform vec3 u_color;
    uniform float u_lit;
    in  vec3 v_nrm;
    out vec4 o_col;
    void main() {
        vec3 key  = normalize(vec3(0.6, 0.8, 0.5));
        vec3 fill = normalize(vec3(-0.5, 0.2, -0.6));
        vec3 n = normalize(v_nrm);
        float light = 0.35 + 0.55 * abs(dot(n, key)) + 0.15 * abs(dot(n, fill));
        o_col = vec4(mix(u_color, u_color * light, u_lit), 1.0);
    }"#;

impl GpuMesh {
    pub unsafe fn new(gl: &Context) -> Result<Self, String> {
        unsafe {
            let program = gl.create_program()?;
            let mut shaders = Vec::with_capacity(2);
            for (kind, src) in [(glow::VERTEX_SHADER, VERTEX_SHADER), (glow::FRAGMENT_SHADER, FRAGMENT_SHADER)] {
                let shader = gl.create_shader(kind)?;
                gl.shader_source(shader, &format!("{SHADER_VERSION}{src}"));
                gl.compile_shader(shader);
                if !gl.get_shader_compile_status(shader) {
                    return Err(gl.get_shader_info_log(shader));
                }
                gl.attach_shader(program, shader);
                shaders.push(shader);
            }
            gl.link_program(program);
            if !gl.get_program_link_status(program) {
                return Err(gl.get_program_info_log(program));
            }
            for shader in shaders {
                gl.detach_shader(program, shader);
                gl.delete_shader(shader);
            }

            let uniform = |name: &str| {
                gl.get_uniform_location(program, name)
                    .ok_or_else(|| format!("uniform {name} missing"))
            };
            let u_mvp = uniform("u_mvp")?;
            let u_color = uniform("u_color")?;
            let u_lit = uniform("u_lit")?;

            Ok(Self {
                program,
                mesh: Batch::new(gl)?,
                grid: Batch::new(gl)?,
                u_mvp,
                u_color,
                u_lit,
            })
        }
    }

    /// `verts` is interleaved `xyz nx ny nz`.
    pub unsafe fn upload_mesh(&mut self, gl: &Context, verts: &[f32]) {
        unsafe { self.mesh.upload(gl, verts) }
    }

    pub unsafe fn upload_grid(&mut self, gl: &Context, verts: &[f32]) {
        unsafe { self.grid.upload(gl, verts) }
    }

    pub unsafe fn paint(&self, gl: &Context, mvp: Matrix4<f32>, show_grid: bool) {
        unsafe {
            gl.enable(glow::DEPTH_TEST);
            gl.depth_func(glow::LEQUAL);
            gl.clear(glow::DEPTH_BUFFER_BIT);

            gl.use_program(Some(self.program));
            gl.uniform_matrix_4_f32_slice(Some(&self.u_mvp), false, mvp.as_slice());

            if show_grid && self.grid.vertex_count > 0 {
                gl.uniform_3_f32(Some(&self.u_color), 0.35, 0.35, 0.4);
                gl.uniform_1_f32(Some(&self.u_lit), 0.0);
                gl.bind_vertex_array(Some(self.grid.vao));
                gl.draw_arrays(glow::LINES, 0, self.grid.vertex_count);
            }

            if self.mesh.vertex_count > 0 {
                gl.uniform_3_f32(Some(&self.u_color), 0.82, 0.78, 0.72);
                gl.uniform_1_f32(Some(&self.u_lit), 1.0);
                gl.bind_vertex_array(Some(self.mesh.vao));
                gl.draw_arrays(glow::TRIANGLES, 0, self.mesh.vertex_count);
            }

            gl.bind_vertex_array(None);
            gl.disable(glow::DEPTH_TEST);
        }
    }

    pub unsafe fn destroy(&self, gl: &Context) {
        unsafe {
            gl.delete_program(self.program);
            for batch in [&self.mesh, &self.grid] {
                gl.delete_vertex_array(batch.vao);
                gl.delete_buffer(batch.vbo);
            }
        }
    }
}

impl Batch {
    unsafe fn new(gl: &Context) -> Result<Self, String> {
        unsafe {
            let vao = gl.create_vertex_array()?;
            let vbo = gl.create_buffer()?;
            gl.bind_vertex_array(Some(vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.enable_vertex_attrib_array(0);
            gl.vertex_attrib_pointer_f32(0, 3, glow::FLOAT, false, 24, 0);
            gl.enable_vertex_attrib_array(1);
            gl.vertex_attrib_pointer_f32(1, 3, glow::FLOAT, false, 24, 12);
            gl.bind_vertex_array(None);
            Ok(Self { vao, vbo, vertex_count: 0 })
        }
    }

    unsafe fn upload(&mut self, gl: &Context, verts: &[f32]) {
        unsafe {
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(verts), glow::STATIC_DRAW);
        }
        // 6 floats per vertex: xyz + normal
        self.vertex_count = (verts.len() / 6) as i32;
    }
}

/// Ground grid lines on the plane just under the model, sized to its radius.
pub fn grid_vertices(center: [f32; 3], radius: f32) -> Vec<f32> {
    const LINES: i32 = 10;
    let half = radius * 1.5;
    let step = half * 2.0 / LINES as f32;
    let y = center[1] - radius;
    let mut out = Vec::with_capacity(((LINES + 1) * 4 * 6) as usize);
    for i in 0..=LINES {
        let t = -half + i as f32 * step;
        let (x, z) = (center[0], center[2]);
        for [ax, az, bx, bz] in [[x + t, z - half, x + t, z + half], [x - half, z + t, x + half, z + t]] {
            out.extend_from_slice(&[ax, y, az, 0.0, 1.0, 0.0, bx, y, bz, 0.0, 1.0, 0.0]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_has_two_lines_per_step() {
        let verts = grid_vertices([0.0, 0.0, 0.0], 1.0);
        assert_eq!(verts.len(), 11 * 2 * 2 * 6);
        // every vertex sits on the ground plane
        assert!(verts.chunks_exact(6).all(|v| v[1] == -1.0));
    }
}
